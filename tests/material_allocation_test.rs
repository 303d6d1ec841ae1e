// ==========================================
// 物料分配与取消测试
// ==========================================
// 覆盖: 全有或全无分配、SKU 生成、取消时物料归还/保留
// ==========================================


#[path = "helpers/test_data_builder.rs"]
mod test_data_builder;

use garment_production_flow::api::ApiError;
use garment_production_flow::config::WorkflowConfig;
use garment_production_flow::domain::{AllocationRequest, BatchStatus, TimelineEventKind};
use garment_production_flow::engine::EngineError;

use test_data_builder::BatchDraftBuilder;
use test_helpers::*;

#[test]
fn test_allocation_is_all_or_nothing() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);
    env.seed_variant("v-blue", "Blue", 5.0);

    let draft = BatchDraftBuilder::new("KMJ-001")
        .cell("M", "Red", 40)
        .cell("M", "Blue", 20)
        .allocate("v-red", 2, 50.0)
        .allocate("v-blue", 1, 10.0)
        .build();

    let err = env.api.create_batch(&lead(), &draft).unwrap_err();
    match err {
        ApiError::Engine(EngineError::InsufficientStock {
            variant_id,
            available,
            requested,
        }) => {
            assert_eq!(variant_id, "v-blue");
            assert_eq!(available, 5.0);
            assert_eq!(requested, 10.0);
        }
        other => panic!("Expected InsufficientStock, got {:?}", other),
    }

    assert_eq!(env.stock_of("v-red"), 100.0);
    assert_eq!(env.stock_of("v-blue"), 5.0);
    assert!(env.api.list_batches(None).unwrap().is_empty());
}

#[test]
fn test_create_with_allocations_walks_to_allocated() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);

    let draft = BatchDraftBuilder::new("KMJ-001")
        .cell("S", "Red", 30)
        .cell("M", "Red", 70)
        .allocate("v-red", 3, 45.5)
        .notes("order toko A")
        .build();
    let detail = env.api.create_batch(&lead(), &draft).unwrap();

    assert_eq!(detail.batch.status, BatchStatus::MaterialAllocated);
    assert_eq!(detail.batch.total_rolls, 3);
    assert_eq!(detail.batch.target_quantity, 100);
    assert_eq!(detail.requests.len(), 2);
    assert_eq!(detail.allocations.len(), 1);
    assert_eq!(detail.allocations[0].color, "Red");
    assert!(!detail.allocations[0].released);
    assert!(detail.batch.batch_sku.starts_with("PB-"));
    assert!(detail.batch.batch_sku.ends_with("-001"));
    assert_eq!(env.stock_of("v-red"), 54.5);

    let history = env.api.get_status_history(&detail.batch.batch_id).unwrap();
    assert_eq!(
        history,
        vec![
            BatchStatus::Pending,
            BatchStatus::MaterialRequested,
            BatchStatus::MaterialAllocated
        ]
    );

    // 同日第二个批次序号递增
    let second = env
        .api
        .create_batch(&lead(), &BatchDraftBuilder::new("KMJ-002").cell("M", "Red", 5).build())
        .unwrap();
    assert!(second.batch.batch_sku.ends_with("-002"));
    assert_eq!(second.batch.status, BatchStatus::Pending);
}

#[test]
fn test_two_step_allocation() {
    let env = TestEnv::new();
    env.seed_variant("v-navy", "Navy", 20.0);

    let detail = env
        .api
        .create_batch(&lead(), &BatchDraftBuilder::new("CLN-01").cell("L", "Navy", 12).build())
        .unwrap();
    let batch_id = detail.batch.batch_id;
    let allocation = [AllocationRequest {
        variant_id: "v-navy".to_string(),
        roll_quantity: 1,
        allocated_qty: 8.0,
    }];

    // PENDING 不能直接分配
    let err = env
        .api
        .allocate_material(&lead(), &batch_id, &allocation)
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Engine(EngineError::IllegalTransition {
            from: BatchStatus::Pending,
            ..
        })
    ));
    assert_eq!(env.stock_of("v-navy"), 20.0);

    env.api.request_material(&lead(), &batch_id).unwrap();
    let detail = env
        .api
        .allocate_material(&lead(), &batch_id, &allocation)
        .unwrap();
    assert_eq!(detail.batch.status, BatchStatus::MaterialAllocated);
    assert_eq!(env.stock_of("v-navy"), 12.0);
    assert_eq!(env.api.list_allocations(&batch_id).unwrap().len(), 1);
}

#[test]
fn test_orphan_color_and_duplicate_sku_rejected() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);

    let orphan = BatchDraftBuilder::new("KMJ-001")
        .cell("M", "Red", 10)
        .cell("M", "Green", 10)
        .allocate("v-red", 1, 10.0)
        .build();
    let err = env.api.create_batch(&lead(), &orphan).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert_eq!(env.stock_of("v-red"), 100.0);

    let first = BatchDraftBuilder::new("KMJ-001").sku("PB-MANUAL-1").cell("M", "Red", 10).build();
    env.api.create_batch(&lead(), &first).unwrap();
    let err = env.api.create_batch(&lead(), &first).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert_eq!(
        env.api.find_batch_by_sku("PB-MANUAL-1").unwrap().product_id,
        "KMJ-001"
    );
}

#[test]
fn test_only_production_lead_creates_batches() {
    let env = TestEnv::new();
    let draft = BatchDraftBuilder::new("KMJ-001").cell("M", "Red", 10).build();
    let err = env.api.create_batch(&cutter(), &draft).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    assert!(env.api.list_batches(None).unwrap().is_empty());
}

#[test]
fn test_unknown_variant_is_not_found() {
    let env = TestEnv::new();
    let draft = BatchDraftBuilder::new("KMJ-001")
        .cell("M", "Red", 10)
        .allocate("v-missing", 1, 1.0)
        .build();
    let err = env.api.create_batch(&lead(), &draft).unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn test_stock_adjustment() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 10.0);

    assert_eq!(env.api.adjust_stock(&warehouse(), "v-red", 15.0).unwrap(), 25.0);
    let err = env.api.adjust_stock(&warehouse(), "v-red", -30.0).unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_STOCK");
    assert_eq!(env.stock_of("v-red"), 25.0);

    let err = env.api.adjust_stock(&sewer(), "v-red", 1.0).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

// ==========================================
// 取消
// ==========================================

#[test]
fn test_cancel_before_cutting_releases_stock() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);
    let detail = env.api.create_batch(&lead(), &simple_draft(&[("M", "Red", 10)])).unwrap();
    let batch_id = detail.batch.batch_id;
    assert_eq!(env.stock_of("v-red"), 90.0);

    let outcome = env
        .api
        .cancel_batch(&supervisor(), &batch_id, Some("order dibatalkan"))
        .unwrap();
    assert_eq!(outcome.batch.status, BatchStatus::Cancelled);
    assert_eq!(outcome.released.len(), 1);
    assert!(!outcome.stock_retained);
    assert_eq!(env.stock_of("v-red"), 100.0);

    let allocations = env.api.list_allocations(&batch_id).unwrap();
    assert!(allocations.iter().all(|a| a.released));

    let timeline = env.api.get_timeline(&batch_id).unwrap();
    assert!(timeline
        .iter()
        .any(|e| e.event == TimelineEventKind::MaterialReleased.as_str()));

    // 已取消的批次不能再次取消,也不会重复归还
    let err = env.api.cancel_batch(&lead(), &batch_id, None).unwrap_err();
    assert_eq!(err.code(), "ILLEGAL_TRANSITION");
    assert_eq!(env.stock_of("v-red"), 100.0);
}

#[test]
fn test_reregistering_variant_cannot_rewrite_stock() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);
    let detail = env.api.create_batch(&lead(), &simple_draft(&[("M", "Red", 10)])).unwrap();
    let batch_id = detail.batch.batch_id;
    assert_eq!(env.stock_of("v-red"), 90.0);

    let err = env
        .api
        .register_material_variant(&warehouse(), &variant("v-red", "Red", 100.0))
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert_eq!(env.stock_of("v-red"), 90.0);

    // 取消后库存恰好回到初始值
    env.api.cancel_batch(&lead(), &batch_id, None).unwrap();
    assert_eq!(env.stock_of("v-red"), 100.0);
}

#[test]
fn test_cancel_after_cutting_started_retains_stock() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);
    let batch_id = env.batch_in_cutting(&[("M", "Red", 10)]);

    let outcome = env.api.cancel_batch(&lead(), &batch_id, None).unwrap();
    assert!(outcome.stock_retained);
    assert!(outcome.released.is_empty());
    assert_eq!(env.stock_of("v-red"), 90.0);

    let timeline = env.api.get_timeline(&batch_id).unwrap();
    assert!(timeline
        .iter()
        .any(|e| e.event == TimelineEventKind::MaterialRetained.as_str()));
}

#[test]
fn test_late_cancel_releases_when_configured() {
    let config = WorkflowConfig {
        release_stock_on_late_cancel: true,
        ..WorkflowConfig::default()
    };
    let env = TestEnv::with_config(config, None);
    env.seed_variant("v-red", "Red", 100.0);
    let batch_id = env.batch_in_cutting(&[("M", "Red", 10)]);

    let outcome = env.api.cancel_batch(&lead(), &batch_id, None).unwrap();
    assert!(!outcome.stock_retained);
    assert_eq!(outcome.released.len(), 1);
    assert_eq!(env.stock_of("v-red"), 100.0);
}

#[test]
fn test_workers_cannot_cancel() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);
    let batch_id = env.batch_in_cutting(&[("M", "Red", 10)]);

    let err = env.api.cancel_batch(&cutter(), &batch_id, None).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::InCutting);
}

#[test]
fn test_material_catalog_listing() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 10.0);
    env.seed_variant("v-blue", "Blue", 4.0);

    let variants = env.api.list_material_variants().unwrap();
    assert_eq!(variants.len(), 2);
    // 同一物料按颜色排序
    assert_eq!(variants[0].color, "Blue");
    assert_eq!(variants[1].variant_id, "v-red");
}
