// ==========================================
// 成衣生产流转系统 - 命令行入口
// ==========================================
// 用法:
//   garment-flow                      初始化数据库并列出批次
//   garment-flow report <batch_id>    输出批次对账 CSV
//   garment-flow timeline <batch_id>  输出批次时间线 (JSON 行)
//   garment-flow recent [n]           最近 n 条事件 (默认 20)
//   garment-flow materials            物料规格与库存
// ==========================================

use anyhow::{bail, Context, Result};

use garment_production_flow::app::{get_default_db_path, AppState};
use garment_production_flow::{logging, APP_NAME, VERSION};

fn main() -> Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", APP_NAME, VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path).context("无法初始化AppState")?;
    let api = &state.production_api;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] => {
            for batch in api.list_batches(None)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    batch.batch_id, batch.batch_sku, batch.status, batch.product_name
                );
            }
        }
        ["report", batch_id] => {
            let csv = api
                .export_reconciliation_csv(batch_id)
                .with_context(|| format!("导出对账报表失败: {}", batch_id))?;
            print!("{}", csv);
        }
        ["timeline", batch_id] => {
            for event in api.get_timeline(batch_id)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        ["recent", rest @ ..] => {
            let limit = match rest {
                [] => 20,
                [n] => n.parse().with_context(|| format!("无效的条数: {}", n))?,
                _ => bail!("用法: recent [n]"),
            };
            for event in api.recent_activity(limit)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        ["materials"] => {
            for variant in api.list_material_variants()? {
                println!(
                    "{}\t{}\t{}\t{:.2} {}",
                    variant.variant_id, variant.material_name, variant.color, variant.stock, variant.unit
                );
            }
        }
        other => bail!(
            "未知命令: {:?} (可用: report <batch_id> | timeline <batch_id> | recent [n] | materials)",
            other
        ),
    }

    Ok(())
}
