// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 后台投递线程
//! Background flush worker: delivers event batches off the frame loop

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};
use rand::Rng;
use tracing::{debug, info, warn};

use super::client::IngestApi;
use super::types::Event;
use crate::config::PipelineConfig;

/// 指数退避策略 (带抖动)
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.retry_initial_ms),
            max: Duration::from_millis(config.retry_max_ms.max(config.retry_initial_ms)),
        }
    }

    /// 第 attempt 次失败后的等待时间, 非临时错误直接取上限
    pub fn delay(&self, attempt: u32, transient: bool) -> Duration {
        if !transient {
            return self.max;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.initial.saturating_mul(1u32 << exp).min(self.max);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(jitter).min(self.max)
    }
}

enum FlushCommand {
    Deliver(Vec<Event>),
    Drain {
        deadline: Instant,
        reply: Sender<usize>,
    },
    Discard {
        reply: Sender<usize>,
    },
    Shutdown,
}

/// 线程与句柄共享的计数
#[derive(Default)]
struct Counters {
    pending: AtomicUsize,
    dropped: AtomicU64,
}

/// 投递线程句柄, Drop 时停止线程
pub struct FlushWorker {
    tx: Sender<FlushCommand>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl FlushWorker {
    /// 启动投递线程; 积压超过 max_queued 个事件时丢弃最旧的
    pub fn spawn<A: IngestApi + 'static>(
        api: Arc<A>,
        auth_token: String,
        policy: RetryPolicy,
        max_queued: usize,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);

        let handle = thread::Builder::new()
            .name("event-flush".to_string())
            .spawn(move || run(api.as_ref(), &auth_token, policy, max_queued, rx, &shared))?;

        Ok(Self {
            tx,
            handle: Some(handle),
            counters,
        })
    }

    /// 提交一个批次; 线程已退出时原样返回
    pub fn submit(&self, batch: Vec<Event>) -> Result<(), Vec<Event>> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.counters.pending.fetch_add(count, Ordering::SeqCst);
        if let Err(SendError(FlushCommand::Deliver(batch))) =
            self.tx.send(FlushCommand::Deliver(batch))
        {
            self.counters.pending.fetch_sub(count, Ordering::SeqCst);
            return Err(batch);
        }
        Ok(())
    }

    /// 等待积压投递完成, 返回超时后仍未送达的事件数
    pub fn drain(&self, timeout: Duration) -> usize {
        let (reply, done) = crossbeam_channel::bounded(1);
        let deadline = Instant::now() + timeout;
        if self.tx.send(FlushCommand::Drain { deadline, reply }).is_err() {
            return self.pending_events();
        }
        // 线程在 deadline 时回复, 额外等待一次HTTP往返
        match done.recv_timeout(timeout + Duration::from_millis(500)) {
            Ok(remaining) => remaining,
            Err(_) => self.pending_events(),
        }
    }

    /// 丢弃全部积压, 返回丢弃的事件数
    pub fn discard(&self) -> usize {
        let (reply, done) = crossbeam_channel::bounded(1);
        if self.tx.send(FlushCommand::Discard { reply }).is_err() {
            return 0;
        }
        done.recv_timeout(Duration::from_secs(1)).unwrap_or(0)
    }

    pub fn pending_events(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    /// 因积压超限被丢弃的事件数
    pub fn dropped_events(&self) -> u64 {
        self.counters.dropped.load(Ordering::SeqCst)
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(FlushCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("❌ 事件投递线程异常退出");
            }
        }
    }
}

// ========== 线程主循环 ==========

fn run<A: IngestApi + ?Sized>(
    api: &A,
    auth_token: &str,
    policy: RetryPolicy,
    max_queued: usize,
    rx: Receiver<FlushCommand>,
    counters: &Counters,
) {
    debug!("✅ 事件投递线程已启动");
    let pending = &counters.pending;

    let mut backlog: VecDeque<Vec<Event>> = VecDeque::new();
    let mut attempt: u32 = 0;
    let mut retry_at: Option<Instant> = None;
    let mut drain: Option<(Instant, Sender<usize>)> = None;
    let mut stopping = false;

    loop {
        // 1. 等待命令: 无积压时阻塞, 否则最多等到下次重试/排空截止
        let mut wake = if backlog.is_empty() {
            None
        } else {
            Some(retry_at.unwrap_or_else(Instant::now))
        };
        if let Some((deadline, _)) = &drain {
            wake = Some(wake.map_or(*deadline, |w| w.min(*deadline)));
        }

        let received = match wake {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(at) => rx.recv_deadline(at),
        };
        match received {
            Ok(FlushCommand::Deliver(batch)) => {
                backlog.push_back(batch);
                enforce_cap(&mut backlog, max_queued, counters);
            }
            Ok(FlushCommand::Drain { deadline, reply }) => drain = Some((deadline, reply)),
            Ok(FlushCommand::Discard { reply }) => {
                let count: usize = backlog.iter().map(Vec::len).sum();
                backlog.clear();
                pending.fetch_sub(count, Ordering::SeqCst);
                attempt = 0;
                retry_at = None;
                if count > 0 {
                    warn!("🗑️ 已丢弃 {} 个积压事件", count);
                }
                let _ = reply.send(count);
            }
            Ok(FlushCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => stopping = true,
            Err(RecvTimeoutError::Timeout) => {}
        }

        // 2. 按顺序投递, 失败则退避
        if retry_at.map_or(true, |at| Instant::now() >= at) {
            while let Some(batch) = backlog.front() {
                match api.ingest(batch, auth_token) {
                    Ok(()) => {
                        pending.fetch_sub(batch.len(), Ordering::SeqCst);
                        debug!(count = batch.len(), "📤 事件批次已送达");
                        backlog.pop_front();
                        attempt = 0;
                        retry_at = None;
                    }
                    Err(e) => {
                        attempt += 1;
                        let delay = policy.delay(attempt, e.is_transient());
                        warn!(
                            "⚠️ 事件投递失败 (第{}次), {:?} 后重试: {}",
                            attempt, delay, e
                        );
                        retry_at = Some(Instant::now() + delay);
                        break;
                    }
                }
            }
        }

        // 3. 排空请求: 积压清空或到达截止时间即回复
        let drained = match &drain {
            Some((deadline, _)) => backlog.is_empty() || Instant::now() >= *deadline,
            None => false,
        };
        if drained {
            if let Some((_, reply)) = drain.take() {
                let _ = reply.send(pending.load(Ordering::SeqCst));
            }
        }

        if stopping {
            break;
        }
    }

    let lost: usize = backlog.iter().map(Vec::len).sum();
    if lost > 0 {
        warn!("⚠️ 投递线程退出, {} 个事件未送达", lost);
    }
    info!("🛑 事件投递线程已停止");
}

/// 积压超过上限时从最旧的批次开始逐个丢弃
fn enforce_cap(backlog: &mut VecDeque<Vec<Event>>, max_queued: usize, counters: &Counters) {
    let total: usize = backlog.iter().map(Vec::len).sum();
    let mut excess = total.saturating_sub(max_queued);
    if excess == 0 {
        return;
    }

    let removed = excess;
    while excess > 0 {
        let Some(front) = backlog.front_mut() else {
            break;
        };
        let n = excess.min(front.len());
        front.drain(..n);
        if front.is_empty() {
            backlog.pop_front();
        }
        excess -= n;
    }

    counters.pending.fetch_sub(removed, Ordering::SeqCst);
    let before = counters.dropped.fetch_add(removed as u64, Ordering::SeqCst);
    let after = before + removed as u64;
    if before == 0 || before / 1000 != after / 1000 {
        warn!(
            "⚠️ 投递积压已满 ({}), 已丢弃 {} 个最旧事件",
            max_queued, after
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{sample_events, MockApi};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(250),
            max: Duration::from_millis(8000),
        };
        let first = policy.delay(1, true);
        assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(300));
        let third = policy.delay(3, true);
        assert!(third >= Duration::from_millis(800) && third <= Duration::from_millis(1200));
        assert!(policy.delay(30, true) <= policy.max);
        assert_eq!(policy.delay(1, false), policy.max);
    }

    #[test]
    fn test_batches_delivered_in_order() {
        let api = Arc::new(MockApi::default());
        let worker = FlushWorker::spawn(api.clone(), "secret".into(), fast_policy(), 100).unwrap();

        let events = sample_events("s1", 6);
        worker.submit(events[..3].to_vec()).unwrap();
        worker.submit(events[3..].to_vec()).unwrap();

        assert_eq!(worker.drain(Duration::from_secs(2)), 0);
        assert_eq!(worker.pending_events(), 0);
        assert_eq!(api.delivered(), events);
        assert_eq!(api.batch_count(), 2);
    }

    #[test]
    fn test_failed_batch_is_retried() {
        let api = Arc::new(MockApi::default());
        api.set_failing(true);
        let worker = FlushWorker::spawn(api.clone(), "secret".into(), fast_policy(), 100).unwrap();

        let events = sample_events("s1", 4);
        worker.submit(events.clone()).unwrap();

        assert_eq!(worker.drain(Duration::from_millis(100)), 4);
        assert!(api.delivered().is_empty());

        api.set_failing(false);
        assert_eq!(worker.drain(Duration::from_secs(2)), 0);
        assert_eq!(api.delivered(), events);
    }

    #[test]
    fn test_empty_batch_ignored() {
        let api = Arc::new(MockApi::default());
        let worker = FlushWorker::spawn(api.clone(), "secret".into(), fast_policy(), 100).unwrap();
        worker.submit(Vec::new()).unwrap();
        assert_eq!(worker.drain(Duration::from_millis(200)), 0);
        assert_eq!(api.batch_count(), 0);
    }

    #[test]
    fn test_backlog_cap_drops_oldest() {
        let api = Arc::new(MockApi::default());
        api.set_failing(true);
        let worker = FlushWorker::spawn(api.clone(), "secret".into(), fast_policy(), 5).unwrap();

        let events = sample_events("s1", 12);
        for chunk in events.chunks(4) {
            worker.submit(chunk.to_vec()).unwrap();
        }
        // drain 在所有批次之后处理
        assert_eq!(worker.drain(Duration::from_millis(50)), 5);
        assert_eq!(worker.dropped_events(), 7);

        api.set_failing(false);
        assert_eq!(worker.drain(Duration::from_secs(2)), 0);
        assert_eq!(api.delivered(), events[7..].to_vec());
    }

    #[test]
    fn test_discard_clears_backlog() {
        let api = Arc::new(MockApi::default());
        api.set_failing(true);
        let worker = FlushWorker::spawn(api.clone(), "secret".into(), fast_policy(), 100).unwrap();

        worker.submit(sample_events("s1", 3)).unwrap();
        assert_eq!(worker.discard(), 3);
        assert_eq!(worker.pending_events(), 0);

        api.set_failing(false);
        let fresh = sample_events("s2", 2);
        worker.submit(fresh.clone()).unwrap();
        assert_eq!(worker.drain(Duration::from_secs(2)), 0);
        assert_eq!(api.delivered(), fresh);
    }
}
