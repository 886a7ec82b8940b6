use serde_json::{json, Map, Value};
use stageline::logger::LOGGER;
use stageline::pipeline::{Dataset, Pipeline, PipelineContext, StepOptions, StepOutput};
use stageline::schema::FieldType;
use stageline::StagelineError;
use std::sync::Arc;
use std::thread;

fn products() -> Dataset {
    [10, 15, 20, 25, 30]
        .iter()
        .enumerate()
        .map(|(i, cost)| json!({ "slug": format!("p{}", i + 1), "monthly_cost": cost }))
        .collect()
}

fn input(slug: &str, months: i64) -> Map<String, Value> {
    let mut input = Map::new();
    input.insert("current_product_slug".to_string(), json!(slug));
    input.insert("months".to_string(), json!(months));
    input
}

fn with_total_cost(item: &Value, ctx: &PipelineContext) -> Option<Value> {
    let months = ctx.input_value("months")?.as_i64()?;
    let mut item = item.clone();
    let total = item["monthly_cost"].as_i64()? * months;
    item["total_cost"] = json!(total);
    Some(item)
}

fn is_current(item: &Value, ctx: &PipelineContext) -> bool {
    item.get("slug") == ctx.input_value("current_product_slug")
}

/// Stage 1 computes the current product aside; stage 2 compares every other
/// product against it.
fn comparison_pipeline() -> Pipeline {
    Pipeline::new("compare", |p| {
        p.nested("current", |current| {
            current.provides("current");
            current.input_schema_with(|s| {
                s.required("current_product_slug", FieldType::String);
            });
            current.filter(is_current);
            current.reduce(with_total_cost);
        });
        p.filter_with(|item, ctx| !is_current(item, ctx), StepOptions::new().name("others"));
        p.reduce_with(with_total_cost, StepOptions::new().name("total_cost"));
        p.reduce_with(
            |item, ctx| {
                let current = ctx.get_first("current").ok()?;
                let savings = item["total_cost"].as_i64()? - current["total_cost"].as_i64()?;
                let mut item = item.clone();
                item["savings"] = json!(savings);
                Some(item)
            },
            StepOptions::new().name("savings").expects(["current"]),
        );
        p.input_schema_with(|s| {
            s.required("months", FieldType::Integer);
        });
    })
    .unwrap()
}

fn column(dataset: &Dataset, field: &str) -> Vec<Value> {
    dataset.iter().map(|item| item[field].clone()).collect()
}

#[test]
fn test_comparison_scenario() {
    let pipeline = comparison_pipeline();
    let result = pipeline.run(products(), input("p2", 2)).unwrap();

    assert!(result.is_valid());
    assert_eq!(
        column(result.dataset(), "slug"),
        vec![json!("p1"), json!("p3"), json!("p4"), json!("p5")]
    );
    assert_eq!(
        column(result.dataset(), "total_cost"),
        vec![json!(20), json!(40), json!(50), json!(60)]
    );
    assert_eq!(
        column(result.dataset(), "savings"),
        vec![json!(-10), json!(10), json!(20), json!(30)]
    );

    let current = result.get("current").unwrap();
    assert_eq!(current[0]["slug"], json!("p2"));
    assert_eq!(current[0]["total_cost"], json!(30));
    assert_eq!(result.step_reports.len(), 4);
    assert_eq!(result.step_reports[1].items_in, 5);
    assert_eq!(result.step_reports[1].items_out, 4);
}

#[test]
fn test_comparison_schema_and_keys() {
    let pipeline = comparison_pipeline();

    // Local fields come first, then the nested pipeline's
    assert_eq!(
        pipeline.input_schema().field_names(),
        vec!["months", "current_product_slug"]
    );
    assert_eq!(pipeline.provided_keys(), vec!["current"]);
    assert_eq!(pipeline.expected_keys(), vec!["current"]);
    assert_eq!(pipeline.provided_key(), None);
}

#[test]
fn test_invalid_input_skips_every_step() {
    let pipeline = comparison_pipeline();
    let mut partial = Map::new();
    partial.insert("current_product_slug".to_string(), json!(7));

    let result = pipeline.run(products(), partial).unwrap();

    assert!(!result.is_valid());
    assert_eq!(result.errors()["$.months"], vec!["is required"]);
    assert_eq!(result.errors()["$.current_product_slug"], vec!["must be a string"]);
    assert_eq!(result.dataset(), &products());
    assert!(result.get("current").is_none());
    assert!(result.step_reports.is_empty());
}

#[test]
fn test_runs_are_idempotent() {
    let pipeline = comparison_pipeline();
    let first = pipeline.run(products(), input("p4", 3)).unwrap();
    let second = pipeline.run(products(), input("p4", 3)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_concurrent_runs_share_nothing() {
    let pipeline = Arc::new(comparison_pipeline());

    let handles: Vec<_> = (1..=5)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                let slug = format!("p{}", i);
                let result = pipeline.run(products(), input(&slug, 1)).unwrap();
                (slug, result)
            })
        })
        .collect();

    for handle in handles {
        let (slug, result) = handle.join().unwrap();
        assert_eq!(result.dataset().len(), 4);
        assert_eq!(result.get("current").unwrap()[0]["slug"], json!(slug));
        assert!(column(result.dataset(), "slug")
            .iter()
            .all(|s| s != &json!(slug)));
    }
}

#[test]
fn test_unmet_dependency_fails_build() {
    let err = Pipeline::new("broken", |p| {
        p.nested("totals", |n| {
            n.provides("totals");
        });
        p.reduce_with(|item, _| Some(item.clone()), StepOptions::new().expects(["current"]));
        p.nested("current", |n| {
            n.provides("current");
        });
    })
    .unwrap_err();

    assert!(err.is_construction_time());
    match err {
        StagelineError::Dependency {
            unmet, available, ..
        } => {
            assert_eq!(unmet, vec!["current"]);
            assert_eq!(available, vec!["totals"]);
        }
        other => panic!("expected dependency error, got {:?}", other),
    }
}

#[test]
fn test_dependency_satisfied_through_nested_pipeline() {
    let producer = Pipeline::new("producer", |n| {
        n.nested("deep", |d| {
            d.provides("deep");
        });
    })
    .unwrap();

    let pipeline = Pipeline::new("consumer", |p| {
        p.pipeline(producer);
        p.step_with(
            |ctx| {
                let deep = ctx.get_dataset("deep")?.clone();
                Ok(StepOutput::Dataset(deep))
            },
            StepOptions::new().expects(["deep"]),
        );
    });

    let pipeline = pipeline.unwrap();
    let result = pipeline.run(vec![json!(1), json!(2)], Map::new()).unwrap();
    assert_eq!(result.dataset(), &vec![json!(1), json!(2)]);
}

#[test]
fn test_call_reuses_validated_context() {
    let pipeline = comparison_pipeline();
    let seed = PipelineContext::with_input(products(), input("p1", 1));

    let context = pipeline.call(&seed).unwrap();
    assert_eq!(
        column(context.dataset(), "savings"),
        vec![json!(5), json!(10), json!(15), json!(20)]
    );
    assert_eq!(seed.dataset(), &products());
    assert!(!seed.has("current"));
}

#[test]
fn test_runs_are_logged() {
    let pipeline = Pipeline::new("logged-run", |p| {
        p.filter(|_, _| true);
    })
    .unwrap();
    pipeline.run(vec![json!(1)], Map::new()).unwrap();

    let logs = LOGGER.get_logs();
    assert!(logs
        .iter()
        .any(|entry| entry.source == "pipeline" && entry.message.contains("'logged-run'")));
}
