use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use gateway_core::models::{ResultPage, TestResult};
use gateway_core::traits::{TestJobRepository, TestResultRepository};
use gateway_core::{GatewayError, GatewayResult};
use serde::Serialize;
use tracing::{debug, instrument};

/// 导出文件的列，顺序固定
pub const CSV_COLUMNS: [&str; 9] = [
    "JobID",
    "ChannelID",
    "ChannelName",
    "Model",
    "Success",
    "Duration(ms)",
    "RetryCount",
    "ErrorMessage",
    "CreatedAt",
];

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// 导出流的游标
enum ExportCursor {
    Header,
    Batch { offset: i64 },
    Done,
}

/// 导出文件中的一行，字段顺序与 [`CSV_COLUMNS`] 一致
#[derive(Serialize)]
struct CsvRow<'a> {
    job_id: i64,
    channel_id: i64,
    channel_name: &'a str,
    model: &'a str,
    success: bool,
    duration_ms: i64,
    retry_count: i64,
    error_message: &'a str,
    created_at: String,
}

impl<'a> From<&'a TestResult> for CsvRow<'a> {
    fn from(result: &'a TestResult) -> Self {
        Self {
            job_id: result.job_id,
            channel_id: result.channel_id,
            channel_name: &result.channel_name,
            model: &result.model_name,
            success: result.success,
            duration_ms: result.duration_millis,
            retry_count: result.retry_count,
            error_message: result.error_message.as_deref().unwrap_or_default(),
            created_at: result.created_at.to_rfc3339(),
        }
    }
}

/// 结果查询与导出
pub struct ResultReporter {
    job_repo: Arc<dyn TestJobRepository>,
    result_repo: Arc<dyn TestResultRepository>,
    batch_size: i64,
}

impl ResultReporter {
    pub fn new(
        job_repo: Arc<dyn TestJobRepository>,
        result_repo: Arc<dyn TestResultRepository>,
        batch_size: i64,
    ) -> Self {
        Self {
            job_repo,
            result_repo,
            batch_size: batch_size.max(1),
        }
    }

    async fn ensure_job(&self, job_id: i64) -> GatewayResult<()> {
        self.job_repo
            .get_by_id(job_id)
            .await?
            .map(|_| ())
            .ok_or(GatewayError::JobNotFound { id: job_id })
    }

    /// 按插入顺序分页查询，页码从 1 开始
    pub async fn list_results(
        &self,
        job_id: i64,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> GatewayResult<ResultPage> {
        self.ensure_job(job_id).await?;

        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(page_size);

        let total = self.result_repo.count_by_job(job_id).await?;
        let items = self
            .result_repo
            .list_by_job(job_id, offset, page_size)
            .await?;

        Ok(ResultPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// 以 CSV 流的形式导出任务的全部结果
    ///
    /// 先输出表头，然后每批查询输出一个分块。任何一批查询失败都会以错误结束流，
    /// 已经输出的分块保持完整。
    #[instrument(skip(self))]
    pub async fn export_csv(
        &self,
        job_id: i64,
    ) -> GatewayResult<BoxStream<'static, GatewayResult<String>>> {
        self.ensure_job(job_id).await?;

        let result_repo = self.result_repo.clone();
        let batch_size = self.batch_size;

        let stream = stream::try_unfold(ExportCursor::Header, move |cursor| {
            next_chunk(result_repo.clone(), job_id, batch_size, cursor)
        });

        Ok(stream.boxed())
    }
}

async fn next_chunk(
    result_repo: Arc<dyn TestResultRepository>,
    job_id: i64,
    batch_size: i64,
    cursor: ExportCursor,
) -> GatewayResult<Option<(String, ExportCursor)>> {
    let offset = match cursor {
        ExportCursor::Header => {
            return Ok(Some((encode_header()?, ExportCursor::Batch { offset: 0 })))
        }
        ExportCursor::Batch { offset } => offset,
        ExportCursor::Done => return Ok(None),
    };

    let batch = result_repo.list_by_job(job_id, offset, batch_size).await?;
    debug!(
        "任务 {} 导出批次: offset={}, rows={}",
        job_id,
        offset,
        batch.len()
    );
    if batch.is_empty() {
        return Ok(None);
    }

    let fetched = batch.len() as i64;
    let chunk = encode_batch(&batch)?;
    let next = if fetched < batch_size {
        ExportCursor::Done
    } else {
        ExportCursor::Batch {
            offset: offset + fetched,
        }
    };
    Ok(Some((chunk, next)))
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn csv_error(e: csv::Error) -> GatewayError {
    GatewayError::Serialization(format!("CSV 编码失败: {e}"))
}

fn into_chunk(writer: csv::Writer<Vec<u8>>) -> GatewayResult<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| GatewayError::Serialization(format!("CSV 输出失败: {}", e.error())))?;
    String::from_utf8(bytes).map_err(|e| GatewayError::Serialization(e.to_string()))
}

fn encode_header() -> GatewayResult<String> {
    let mut writer = csv_writer();
    writer.write_record(CSV_COLUMNS).map_err(csv_error)?;
    into_chunk(writer)
}

/// 一个批次编码为一个分块
fn encode_batch(batch: &[TestResult]) -> GatewayResult<String> {
    let mut writer = csv_writer();
    for result in batch {
        writer.serialize(CsvRow::from(result)).map_err(csv_error)?;
    }
    into_chunk(writer)
}
