// ==========================================
// 生产流转端到端测试
// ==========================================
// 覆盖: 建批 -> 裁剪 -> 缝制子批次 -> 后整子批次 -> 仓库核验 -> 完结
// ==========================================


#[path = "helpers/test_data_builder.rs"]
mod test_data_builder;

use garment_production_flow::api::ApiError;
use garment_production_flow::domain::{
    BatchStatus, CellKey, CellQuantity, CompletionReport, StageKind, SubBatchStatus, TaskStatus,
    TimelineEventKind,
};
use garment_production_flow::engine::state_machine::is_canonical_prefix;
use garment_production_flow::engine::EngineError;

use test_data_builder::{finishing, sewing};
use test_helpers::*;

/// 自第 `from` 行起新增的时间线事件类型
fn events_since(env: &TestEnv, batch_id: &str, from: usize) -> Vec<String> {
    env.api
        .get_timeline(batch_id)
        .unwrap()
        .into_iter()
        .skip(from)
        .map(|e| e.event)
        .collect()
}

fn timeline_len(env: &TestEnv, batch_id: &str) -> usize {
    env.api.get_timeline(batch_id).unwrap().len()
}

fn count_events(env: &TestEnv, batch_id: &str, kind: TimelineEventKind) -> usize {
    env.api
        .get_timeline(batch_id)
        .unwrap()
        .iter()
        .filter(|e| e.event == kind.as_str())
        .count()
}

#[test]
fn test_full_flow_to_completed() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 100.0);

    let batch_id = env.batch_in_sewing(&[("M", "Red", 100)]);
    assert_eq!(env.stock_of("v-red"), 90.0);

    // 缝制 60 + 40
    let first = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 60, 0)], None)
        .unwrap();
    assert!(!first.stage_completed);
    assert_eq!(first.remaining_total(), 40);
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::InSewing);

    let second = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 40, 0)], None)
        .unwrap();
    assert!(second.stage_completed);
    assert_eq!(second.remaining_total(), 0);
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::SewingCompleted);

    let sewing_task = env.api.get_task(&batch_id, StageKind::Sewing).unwrap().unwrap();
    assert_eq!(sewing_task.status, TaskStatus::Completed);
    assert_eq!(sewing_task.pieces_completed, 100);

    // 后整工人接收缝制子批次
    let sewing_subs = env.api.list_sub_batches(&batch_id, Some(StageKind::Sewing)).unwrap();
    assert_eq!(sewing_subs.len(), 2);
    assert!(sewing_subs[0].sub_batch_sku.ends_with("-SW-01"));
    assert!(sewing_subs[1].sub_batch_sku.ends_with("-SW-02"));
    for sub in &sewing_subs {
        let verified = env.api.verify_sub_batch(&finisher(), &sub.sub_batch_id).unwrap();
        assert_eq!(verified.status, SubBatchStatus::Verified);
        assert_eq!(verified.verified_by.as_deref(), Some(FINISHER_ID));
    }

    env.api
        .verify_stage(&supervisor(), &batch_id, StageKind::Sewing)
        .unwrap();

    // 后整
    let task = env
        .api
        .assign_worker(&lead(), &batch_id, StageKind::Finishing, FINISHER_ID)
        .unwrap();
    assert_eq!(task.pieces_received, 100);
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::SewingVerified);

    env.api
        .start_stage(&finisher(), &batch_id, StageKind::Finishing)
        .unwrap();
    let outcome = env
        .api
        .submit_sub_batch(
            &finisher(),
            &batch_id,
            StageKind::Finishing,
            &[finishing("M", "Red", 95, 2, 2, 1)],
            Some("lot pertama"),
        )
        .unwrap();
    assert!(outcome.stage_completed);
    assert!(outcome.sub_batch.sub_batch_sku.ends_with("-FN-01"));
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::FinishingCompleted);

    // 子批次未核验,仓库核验被拒
    let err = env.api.verify_warehouse(&warehouse(), &batch_id).unwrap_err();
    assert!(matches!(err, ApiError::Engine(EngineError::Validation(_))));

    let fn_sub = outcome.sub_batch.sub_batch_id.clone();
    env.api.verify_sub_batch(&warehouse(), &fn_sub).unwrap();
    let again = env.api.verify_sub_batch(&warehouse(), &fn_sub).unwrap_err();
    assert!(matches!(
        again,
        ApiError::Engine(EngineError::SubBatchAlreadyVerified { .. })
    ));

    let batch = env.api.verify_warehouse(&warehouse(), &batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::WarehouseVerified);
    let batch = env.api.complete_batch(&lead(), &batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    // 派生数量
    let quantities = env.api.get_quantities(&batch_id).unwrap();
    assert_eq!(quantities.actual_quantity, 95);
    assert_eq!(quantities.reject_quantity, 5);
    assert_eq!(quantities.sewn_good, 100);

    // 状态序列为规范顺序
    let history = env.api.get_status_history(&batch_id).unwrap();
    assert_eq!(history.len(), BatchStatus::CANONICAL_ORDER.len());
    assert!(is_canonical_prefix(&history));
    assert_eq!(history.last(), Some(&BatchStatus::Completed));

    // 完结后不可取消
    let err = env.api.cancel_batch(&lead(), &batch_id, None).unwrap_err();
    assert_eq!(err.code(), "ILLEGAL_TRANSITION");

    // 对账报表
    let csv = env.api.export_reconciliation_csv(&batch_id).unwrap();
    assert!(csv.contains("M,Red,100,100,100,0,95,2,2,1,0,0"));
}

#[test]
fn test_submission_after_exhaustion_reports_zero_remaining() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 100)]);

    env.api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 60, 0)], None)
        .unwrap();
    env.api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 40, 0)], None)
        .unwrap();

    let err = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 1, 0)], None)
        .unwrap_err();
    match err {
        ApiError::Engine(EngineError::InsufficientRemaining {
            cell,
            remaining,
            requested,
        }) => {
            assert_eq!(cell, CellKey::new("M", "Red"));
            assert_eq!(remaining, 0);
            assert_eq!(requested, 1);
        }
        other => panic!("Expected InsufficientRemaining, got {:?}", other),
    }
    assert_eq!(env.api.list_sub_batches(&batch_id, None).unwrap().len(), 2);
}

#[test]
fn test_over_remaining_cell_rejects_whole_submission() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    env.seed_variant("v-blue", "Blue", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 50), ("L", "Blue", 30)]);

    let err = env
        .api
        .submit_sub_batch(
            &sewer(),
            &batch_id,
            StageKind::Sewing,
            &[sewing("M", "Red", 20, 0), sewing("L", "Blue", 29, 2)],
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_REMAINING");

    assert!(env.api.list_sub_batches(&batch_id, None).unwrap().is_empty());
    assert_eq!(count_events(&env, &batch_id, TimelineEventKind::SubBatchSubmitted), 0);

    let balances = env.api.remaining(&batch_id, StageKind::Sewing).unwrap();
    assert!(balances.iter().all(|b| b.remaining == b.ceiling));
}

#[test]
fn test_exhausted_cell_does_not_complete_stage() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10), ("L", "Red", 5)]);

    let outcome = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 9, 1)], None)
        .unwrap();
    assert!(!outcome.stage_completed);
    assert_eq!(outcome.remaining_total(), 5);
    let task = env.api.get_task(&batch_id, StageKind::Sewing).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::InSewing);

    let outcome = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("L", "Red", 5, 0)], None)
        .unwrap();
    assert!(outcome.stage_completed);
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::SewingCompleted);
}

#[test]
fn test_sub_batch_of_cancelled_batch_cannot_be_verified() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10)]);

    let outcome = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 4, 0)], None)
        .unwrap();
    env.api.cancel_batch(&lead(), &batch_id, None).unwrap();
    let before = timeline_len(&env, &batch_id);

    let err = env
        .api
        .verify_sub_batch(&finisher(), &outcome.sub_batch.sub_batch_id)
        .unwrap_err();
    match err {
        ApiError::Engine(EngineError::InvalidStageTransition {
            stage,
            current,
            batch_status,
            ..
        }) => {
            assert_eq!(stage, StageKind::Sewing);
            assert_eq!(current, TaskStatus::InProgress);
            assert_eq!(batch_status, BatchStatus::Cancelled);
        }
        other => panic!("Expected InvalidStageTransition, got {:?}", other),
    }

    let sub = env.api.get_sub_batch(&outcome.sub_batch.sub_batch_id).unwrap();
    assert_eq!(sub.status, SubBatchStatus::Submitted);
    assert!(sub.verified_by.is_none());
    assert!(events_since(&env, &batch_id, before).is_empty());
}

#[test]
fn test_rejects_count_towards_ceiling() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10)]);

    let outcome = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 8, 2)], None)
        .unwrap();
    assert!(outcome.stage_completed);
    assert_eq!(outcome.processed_total, 10);

    let task = env.api.get_task(&batch_id, StageKind::Sewing).unwrap().unwrap();
    assert_eq!(task.pieces_completed, 8);
    assert_eq!(task.reject_pieces, 2);
    // 后整上限只计缝制良品
    env.api.verify_stage(&supervisor(), &batch_id, StageKind::Sewing).unwrap();
    let finishing_task = env
        .api
        .assign_worker(&lead(), &batch_id, StageKind::Finishing, FINISHER_ID)
        .unwrap();
    assert_eq!(finishing_task.pieces_received, 8);
}

#[test]
fn test_zero_cells_are_not_recorded() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10), ("L", "Red", 10)]);

    let outcome = env
        .api
        .submit_sub_batch(
            &sewer(),
            &batch_id,
            StageKind::Sewing,
            &[sewing("M", "Red", 5, 0), sewing("L", "Red", 0, 0)],
            None,
        )
        .unwrap();
    assert_eq!(outcome.sub_batch.items.len(), 1);

    let err = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("L", "Red", 0, 0)], None)
        .unwrap_err();
    assert_eq!(err.code(), "EMPTY_RESULT_SET");
}

#[test]
fn test_manual_complete_requires_exhausted_ceiling() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10)]);

    let err = env
        .api
        .complete_stage(&sewer(), &batch_id, StageKind::Sewing, &CompletionReport::default())
        .unwrap_err();
    assert_eq!(err.code(), "EMPTY_RESULT_SET");

    env.api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 4, 0)], None)
        .unwrap();
    let err = env
        .api
        .complete_stage(&sewer(), &batch_id, StageKind::Sewing, &CompletionReport::default())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STAGE_TRANSITION");
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::InSewing);
}

#[test]
fn test_cutting_completion_with_zero_pieces_rejected() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_cutting(&[("M", "Red", 10)]);

    let report = CompletionReport {
        results: vec![CellQuantity::new("M", "Red", 0)],
        ..CompletionReport::default()
    };
    let err = env
        .api
        .complete_stage(&cutter(), &batch_id, StageKind::Cutting, &report)
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Engine(EngineError::EmptyResultSet {
            stage: StageKind::Cutting
        })
    ));
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::InCutting);
}

#[test]
fn test_progress_then_complete_backfills_requested_pieces() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_cutting(&[("M", "Red", 0), ("L", "Red", 12)]);

    env.api
        .record_progress(
            &cutter(),
            &batch_id,
            StageKind::Cutting,
            &[CellQuantity::new("M", "Red", 20)],
            Some("setengah hari"),
        )
        .unwrap();
    // 进度不推进批次状态
    assert_eq!(env.api.get_batch(&batch_id).unwrap().status, BatchStatus::InCutting);

    let report = CompletionReport {
        results: vec![CellQuantity::new("L", "Red", 12)],
        reject_pieces: 1,
        waste_qty: 0.5,
        notes: None,
    };
    let task = env
        .api
        .complete_stage(&cutter(), &batch_id, StageKind::Cutting, &report)
        .unwrap();
    assert_eq!(task.pieces_completed, 32);
    assert_eq!(task.reject_pieces, 1);

    let detail = env.api.get_batch_detail(&batch_id).unwrap();
    let m = detail
        .requests
        .iter()
        .find(|r| r.product_size == "M")
        .unwrap();
    assert_eq!(m.requested_pieces, 20);
    assert_eq!(count_events(&env, &batch_id, TimelineEventKind::RequestBackfilled), 1);

    env.api.verify_stage(&supervisor(), &batch_id, StageKind::Cutting).unwrap();
    let detail = env.api.get_batch_detail(&batch_id).unwrap();
    assert!(detail.cutting_results.iter().all(|r| r.is_confirmed));
    assert!(detail
        .cutting_results
        .iter()
        .all(|r| r.confirmed_by.as_deref() == Some(SUPERVISOR_ID)));
}

#[test]
fn test_start_twice_is_rejected_without_duplicate_events() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_cutting(&[("M", "Red", 10)]);

    let before = timeline_len(&env, &batch_id);
    let err = env
        .api
        .start_stage(&cutter(), &batch_id, StageKind::Cutting)
        .unwrap_err();
    match err {
        ApiError::Engine(EngineError::InvalidStageTransition {
            stage,
            current,
            batch_status,
            ..
        }) => {
            assert_eq!(stage, StageKind::Cutting);
            assert_eq!(current, TaskStatus::InProgress);
            assert_eq!(batch_status, BatchStatus::InCutting);
        }
        other => panic!("Expected InvalidStageTransition, got {:?}", other),
    }
    assert!(events_since(&env, &batch_id, before).is_empty());
}

#[test]
fn test_role_and_assignee_checks() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10)]);

    // 缝制工不能核验
    let err = env
        .api
        .verify_stage(&sewer(), &batch_id, StageKind::Sewing)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    // 非指派缝制工不能提交
    let other = garment_production_flow::ActorContext::new(
        "sewer-99",
        garment_production_flow::ActorRole::Sewer,
    );
    let err = env
        .api
        .submit_sub_batch(&other, &batch_id, StageKind::Sewing, &[sewing("M", "Red", 1, 0)], None)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    // 缝制工不能接收自己的子批次
    let outcome = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 3, 0)], None)
        .unwrap();
    let err = env
        .api
        .verify_sub_batch(&sewer(), &outcome.sub_batch.sub_batch_id)
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    // 空操作人
    let anonymous = garment_production_flow::ActorContext::new(
        "  ",
        garment_production_flow::ActorRole::ProductionLead,
    );
    let err = env.api.cancel_batch(&anonymous, &batch_id, None).unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[test]
fn test_each_transition_has_one_status_event() {
    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let batch_id = env.batch_in_sewing(&[("M", "Red", 10)]);

    // PENDING -> ... -> IN_SEWING: 8 次转换
    assert_eq!(count_events(&env, &batch_id, TimelineEventKind::StatusChanged), 8);
    let history = env.api.get_status_history(&batch_id).unwrap();
    assert_eq!(history.last(), Some(&BatchStatus::InSewing));
    assert!(is_canonical_prefix(&history));
}

/// 断言自上次检查以来新增的事件恰为 `expected`, 并前移检查点
fn assert_appended(env: &TestEnv, batch_id: &str, mark: &mut usize, step: &str, expected: &[TimelineEventKind]) {
    let added = events_since(env, batch_id, *mark);
    let expected: Vec<&str> = expected.iter().map(|k| k.as_str()).collect();
    assert_eq!(added, expected, "{} 追加的事件", step);
    *mark += added.len();
}

#[test]
fn test_each_transition_appends_exactly_one_row() {
    use TimelineEventKind::{StatusChanged, SubBatchSubmitted, SubBatchVerified, TaskAssigned};

    let env = TestEnv::new();
    env.seed_variant("v-red", "Red", 50.0);
    let detail = env.api.create_batch(&lead(), &simple_draft(&[("M", "Red", 10)])).unwrap();
    let batch_id = detail.batch.batch_id;
    let mut mark = timeline_len(&env, &batch_id);

    env.api
        .assign_worker(&lead(), &batch_id, StageKind::Cutting, CUTTER_ID)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "assign cutting", &[StatusChanged]);
    env.api
        .start_stage(&cutter(), &batch_id, StageKind::Cutting)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "start cutting", &[StatusChanged]);
    let report = CompletionReport {
        results: vec![CellQuantity::new("M", "Red", 10)],
        ..CompletionReport::default()
    };
    env.api
        .complete_stage(&cutter(), &batch_id, StageKind::Cutting, &report)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "complete cutting", &[StatusChanged]);
    env.api
        .verify_stage(&supervisor(), &batch_id, StageKind::Cutting)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "verify cutting", &[StatusChanged]);

    env.api
        .assign_worker(&lead(), &batch_id, StageKind::Sewing, SEWER_ID)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "assign sewing", &[StatusChanged]);
    env.api
        .start_stage(&sewer(), &batch_id, StageKind::Sewing)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "start sewing", &[StatusChanged]);
    let sewn = env
        .api
        .submit_sub_batch(&sewer(), &batch_id, StageKind::Sewing, &[sewing("M", "Red", 10, 0)], None)
        .unwrap();
    assert!(sewn.stage_completed);
    // 提交本身一行, 触发的自动完工一行
    assert_appended(&env, &batch_id, &mut mark, "sewing submit", &[SubBatchSubmitted, StatusChanged]);
    env.api
        .verify_sub_batch(&finisher(), &sewn.sub_batch.sub_batch_id)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "receive sewing sub-batch", &[SubBatchVerified]);
    env.api
        .verify_stage(&supervisor(), &batch_id, StageKind::Sewing)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "verify sewing", &[StatusChanged]);

    // 后整指派不改变批次状态
    env.api
        .assign_worker(&lead(), &batch_id, StageKind::Finishing, FINISHER_ID)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "assign finishing", &[TaskAssigned]);
    env.api
        .start_stage(&finisher(), &batch_id, StageKind::Finishing)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "start finishing", &[StatusChanged]);
    let finished = env
        .api
        .submit_sub_batch(
            &finisher(),
            &batch_id,
            StageKind::Finishing,
            &[finishing("M", "Red", 10, 0, 0, 0)],
            None,
        )
        .unwrap();
    assert!(finished.stage_completed);
    assert_appended(&env, &batch_id, &mut mark, "finishing submit", &[SubBatchSubmitted, StatusChanged]);
    env.api
        .verify_sub_batch(&warehouse(), &finished.sub_batch.sub_batch_id)
        .unwrap();
    assert_appended(&env, &batch_id, &mut mark, "receive finishing sub-batch", &[SubBatchVerified]);
    env.api.verify_warehouse(&warehouse(), &batch_id).unwrap();
    assert_appended(&env, &batch_id, &mut mark, "verify warehouse", &[StatusChanged]);
    env.api.complete_batch(&lead(), &batch_id).unwrap();
    assert_appended(&env, &batch_id, &mut mark, "complete batch", &[StatusChanged]);

    // 工序细节并入状态事件
    let completed = env
        .api
        .get_timeline(&batch_id)
        .unwrap()
        .into_iter()
        .filter(|e| e.event == TimelineEventKind::StatusChanged.as_str())
        .find(|e| e.details.as_ref().map(|d| d["to"] == "CUTTING_COMPLETED").unwrap_or(false))
        .unwrap();
    let details = completed.details.unwrap();
    assert_eq!(details["stage"], "CUTTING");
    assert_eq!(details["pieces_completed"], 10);
    assert_eq!(details["automatic"], false);
}
