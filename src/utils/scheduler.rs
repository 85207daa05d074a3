use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

/// 按 cron 表达式周期性执行入库任务
pub struct TaskScheduler {
    scheduler: JobScheduler,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    /// 注册异步任务；同一任务的多次触发互不等待
    pub async fn add_job<F, Fut>(&self, cron_expr: &str, job_fn: Arc<F>) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let job_fn = Arc::clone(&job_fn);
            Box::pin(async move {
                info!("触发定时入库任务");
                job_fn().await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("已注册定时任务: {}", cron_expr);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}
