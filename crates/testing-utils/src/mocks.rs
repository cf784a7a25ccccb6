//! Mock implementations for all repository and collaborator traits
//!
//! This module provides in-memory implementations that can be used
//! for unit testing without requiring actual database connections or
//! upstream providers.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::models::{
    Channel, ChannelEvent, ChannelHealthUpdate, ChannelStatus, JobStatus, TestJob, TestOutcome,
    TestResult,
};
use gateway_core::traits::{
    ChannelDirectory, ChannelTester, JobCounters, Notifier, TestJobRepository,
    TestResultRepository,
};
use gateway_core::{GatewayError, GatewayResult};

/// Mock implementation of TestResultRepository for testing
#[derive(Debug, Default)]
pub struct MockTestResultRepository {
    results: Mutex<Vec<TestResult>>,
    next_id: Mutex<i64>,
    list_calls: AtomicUsize,
    failing_appends: AtomicUsize,
}

impl MockTestResultRepository {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            list_calls: AtomicUsize::new(0),
            failing_appends: AtomicUsize::new(0),
        }
    }

    /// 接下来的 `count` 次 `append` 返回数据库错误
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn all_results(&self) -> Vec<TestResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn results_for_job(&self, job_id: i64) -> Vec<TestResult> {
        self.all_results()
            .into_iter()
            .filter(|r| r.job_id == job_id)
            .collect()
    }

    /// `list_by_job` 被调用的次数
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestResultRepository for MockTestResultRepository {
    async fn append(&self, result: &TestResult) -> GatewayResult<TestResult> {
        let should_fail = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(GatewayError::DatabaseOperation("disk I/O error".to_string()));
        }

        let mut results = self.results.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let mut new_result = result.clone();
        new_result.id = *next_id;
        *next_id += 1;

        results.push(new_result.clone());
        Ok(new_result)
    }

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<TestResult>> {
        let results = self.results.lock().unwrap();
        Ok(results.iter().find(|r| r.id == id).cloned())
    }

    async fn update(&self, result: &TestResult) -> GatewayResult<()> {
        let mut results = self.results.lock().unwrap();
        match results.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => {
                *existing = result.clone();
                Ok(())
            }
            None => Err(GatewayError::TestResultNotFound { id: result.id }),
        }
    }

    async fn list_by_job(
        &self,
        job_id: i64,
        offset: i64,
        limit: i64,
    ) -> GatewayResult<Vec<TestResult>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let results = self.results.lock().unwrap();
        Ok(results
            .iter()
            .filter(|r| r.job_id == job_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_by_job(&self, job_id: i64) -> GatewayResult<i64> {
        let results = self.results.lock().unwrap();
        Ok(results.iter().filter(|r| r.job_id == job_id).count() as i64)
    }

    async fn list_failed(&self, job_id: i64) -> GatewayResult<Vec<TestResult>> {
        let results = self.results.lock().unwrap();
        Ok(results
            .iter()
            .filter(|r| r.job_id == job_id && !r.success)
            .cloned()
            .collect())
    }
}

/// Mock implementation of TestJobRepository for testing
#[derive(Debug)]
pub struct MockTestJobRepository {
    jobs: Mutex<HashMap<i64, TestJob>>,
    next_id: Mutex<i64>,
    results: Option<Arc<MockTestResultRepository>>,
    fail_create: Mutex<bool>,
    /// 每个任务被真正终结的次数
    finalize_counts: Mutex<HashMap<i64, usize>>,
}

impl MockTestJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            results: None,
            fail_create: Mutex::new(false),
            finalize_counts: Mutex::new(HashMap::new()),
        }
    }

    /// 关联结果仓储，使 `recompute_counters` 可用
    pub fn with_results(results: Arc<MockTestResultRepository>) -> Self {
        Self {
            results: Some(results),
            ..Self::new()
        }
    }

    pub fn fail_on_create(&self, fail: bool) {
        *self.fail_create.lock().unwrap() = fail;
    }

    pub fn insert(&self, job: TestJob) -> TestJob {
        let mut jobs = self.jobs.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut job = job;
        if job.id == 0 {
            job.id = *next_id;
        }
        *next_id = (*next_id).max(job.id + 1);
        jobs.insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: i64) -> Option<TestJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn finalize_count(&self, id: i64) -> usize {
        self.finalize_counts
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or_default()
    }
}

impl Default for MockTestJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn counters_of(job: &TestJob) -> JobCounters {
    JobCounters {
        completed_count: job.completed_count,
        success_count: job.success_count,
        failure_count: job.failure_count,
    }
}

#[async_trait]
impl TestJobRepository for MockTestJobRepository {
    async fn create(&self, job: &TestJob) -> GatewayResult<TestJob> {
        if *self.fail_create.lock().unwrap() {
            return Err(GatewayError::DatabaseOperation(
                "mock create failure".to_string(),
            ));
        }
        Ok(self.insert(job.clone()))
    }

    async fn get_by_id(&self, id: i64) -> GatewayResult<Option<TestJob>> {
        Ok(self.get(id))
    }

    async fn list_recent(&self, limit: i64) -> GatewayResult<Vec<TestJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut all: Vec<TestJob> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn mark_running(&self, id: i64, total_models: i64) -> GatewayResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(GatewayError::JobNotFound { id })?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.total_models = total_models;
        Ok(true)
    }

    async fn record_unit_completed(&self, id: i64, success: bool) -> GatewayResult<JobCounters> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(GatewayError::JobNotFound { id })?;
        if job.completed_count < job.total_models {
            job.completed_count += 1;
            if success {
                job.success_count += 1;
            } else {
                job.failure_count += 1;
            }
        }
        Ok(counters_of(job))
    }

    async fn finalize(
        &self,
        id: i64,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> GatewayResult<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(GatewayError::JobNotFound { id })?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = status;
        job.finished_at = Some(Utc::now());
        job.error_message = error_message.map(str::to_string);
        *self.finalize_counts.lock().unwrap().entry(id).or_default() += 1;
        Ok(true)
    }

    async fn recompute_counters(&self, id: i64) -> GatewayResult<JobCounters> {
        let results = self
            .results
            .as_ref()
            .map(|r| r.results_for_job(id))
            .unwrap_or_default();
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(GatewayError::JobNotFound { id })?;
        job.completed_count = results.len() as i64;
        job.success_count = results.iter().filter(|r| r.success).count() as i64;
        job.failure_count = results.iter().filter(|r| !r.success).count() as i64;
        Ok(counters_of(job))
    }

    async fn list_unfinished(&self) -> GatewayResult<Vec<TestJob>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect())
    }
}

/// Mock implementation of ChannelDirectory for testing
#[derive(Debug, Default)]
pub struct MockChannelDirectory {
    channels: Mutex<BTreeMap<i64, Channel>>,
    failing_updates: Mutex<HashSet<i64>>,
    fail_listing: Mutex<bool>,
    events: Mutex<Vec<ChannelEvent>>,
}

impl MockChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let directory = Self::new();
        for channel in channels {
            directory.insert(channel);
        }
        directory
    }

    pub fn insert(&self, channel: Channel) {
        self.channels.lock().unwrap().insert(channel.id, channel);
    }

    pub fn get(&self, id: i64) -> Option<Channel> {
        self.channels.lock().unwrap().get(&id).cloned()
    }

    /// 让指定渠道的写操作失败
    pub fn fail_updates_for(&self, id: i64) {
        self.failing_updates.lock().unwrap().insert(id);
    }

    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap() = fail;
    }

    /// 已发出的缓存失效事件
    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().unwrap().clone()
    }

    fn check_writable(&self, id: i64) -> GatewayResult<()> {
        if self.failing_updates.lock().unwrap().contains(&id) {
            return Err(GatewayError::DatabaseOperation(format!(
                "mock update failure for channel {id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelDirectory for MockChannelDirectory {
    async fn get_channel(&self, id: i64, with_secret: bool) -> GatewayResult<Option<Channel>> {
        Ok(self.get(id).map(|mut c| {
            if !with_secret {
                c.key = None;
            }
            c
        }))
    }

    async fn list_channels(
        &self,
        offset: i64,
        limit: i64,
        enabled_only: bool,
    ) -> GatewayResult<Vec<Channel>> {
        if *self.fail_listing.lock().unwrap() {
            return Err(GatewayError::DatabaseOperation(
                "mock listing failure".to_string(),
            ));
        }
        let channels = self.channels.lock().unwrap();
        Ok(channels
            .values()
            .filter(|c| !enabled_only || c.status == ChannelStatus::Enabled)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn update_models(
        &self,
        id: i64,
        models: &[String],
        retested_at: DateTime<Utc>,
    ) -> GatewayResult<()> {
        self.check_writable(id)?;
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .get_mut(&id)
            .ok_or(GatewayError::ChannelNotFound { id })?;
        channel.models = models.to_vec();
        channel.retested_at = Some(retested_at);
        self.events
            .lock()
            .unwrap()
            .push(ChannelEvent::ModelsUpdated { channel_id: id });
        Ok(())
    }

    async fn update_status(
        &self,
        id: i64,
        status: ChannelStatus,
        reason: Option<&str>,
    ) -> GatewayResult<()> {
        self.check_writable(id)?;
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .get_mut(&id)
            .ok_or(GatewayError::ChannelNotFound { id })?;
        channel.status = status;
        channel.status_reason = reason.map(str::to_string);
        channel.status_time = Some(Utc::now());
        self.events.lock().unwrap().push(ChannelEvent::StatusChanged {
            channel_id: id,
            status,
        });
        Ok(())
    }

    async fn update_health(&self, id: i64, update: &ChannelHealthUpdate) -> GatewayResult<()> {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .get_mut(&id)
            .ok_or(GatewayError::ChannelNotFound { id })?;
        channel.response_time_ms = update.response_time_ms;
        channel.test_time = Some(update.test_time);
        self.events
            .lock()
            .unwrap()
            .push(ChannelEvent::HealthUpdated { channel_id: id });
        Ok(())
    }
}

type CallHook = Box<dyn Fn(usize, i64, &str) + Send + Sync>;

/// 按脚本返回结果的测试执行器
///
/// 未配置脚本的 (渠道, 模型) 返回成功。配置了序列时按顺序返回，
/// 序列只剩最后一个结果时重复返回它。
pub struct ScriptedTester {
    scripts: Mutex<HashMap<(i64, String), VecDeque<TestOutcome>>>,
    calls: Mutex<HashMap<(i64, String), usize>>,
    total_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    on_call: Option<CallHook>,
}

impl ScriptedTester {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            on_call: None,
        }
    }

    /// 每次调用前等待的时间
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 每次调用开始时执行的回调，参数为全局调用序号（从0开始）、渠道ID、模型
    pub fn with_hook(mut self, hook: impl Fn(usize, i64, &str) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    pub fn always(&self, channel_id: i64, model: &str, outcome: TestOutcome) {
        self.sequence(channel_id, model, vec![outcome]);
    }

    pub fn sequence(&self, channel_id: i64, model: &str, outcomes: Vec<TestOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((channel_id, model.to_string()), outcomes.into());
    }

    pub fn calls_for(&self, channel_id: i64, model: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(channel_id, model.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// 观察到的最大并发调用数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, channel_id: i64, model: &str) -> TestOutcome {
        let key = (channel_id, model.to_string());
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| TestOutcome::success(Duration::from_millis(10))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| TestOutcome::success(Duration::from_millis(10))),
            None => TestOutcome::success(Duration::from_millis(10)),
        }
    }
}

impl Default for ScriptedTester {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelTester for ScriptedTester {
    async fn test(&self, channel: &Channel, model: &str) -> TestOutcome {
        let index = self.total_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(hook) = &self.on_call {
            hook(index, channel.id, model);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self.next_outcome(channel.id, model);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// 记录所有通知的 Notifier
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
    }
}
