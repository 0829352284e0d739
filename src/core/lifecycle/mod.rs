use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

#[derive(Debug, PartialEq)]
pub enum LifecycleState {
    Init,
    ConnectChannels,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<Mutex<dyn LifecycleComponent + Send + Sync>>>,
    pub scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            scheduler,
        })
    }

    pub fn attach(&mut self, component: Arc<Mutex<dyn LifecycleComponent + Send + Sync>>) {
        self.components.push(component);
    }

    /// Register a fixed-period loop on the shared scheduler.
    pub async fn every<F>(&mut self, name: &str, period: Duration, tick: F) -> Result<()>
    where
        F: Fn() -> TickFuture + Send + Sync + 'static,
    {
        let tick = Arc::new(tick);
        let job = Job::new_repeated_async(period, move |_uuid, mut _l| {
            let tick = tick.clone();
            Box::pin(async move {
                tick().await;
            })
        })?;
        self.scheduler.add(job).await?;
        info!("Registered loop '{}' every {:?}", name, period);
        Ok(())
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        info!("Lifecycle Phase: Connect Channels");
        self.state = LifecycleState::ConnectChannels;
        for comp in &self.components {
            comp.lock().await.on_start().await?;
        }

        info!("Lifecycle Phase: Ready (Starting Scheduler)");
        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Scheduler shutdown error: {}", e);
        }
        for comp in &self.components {
            if let Err(e) = comp.lock().await.on_shutdown().await {
                warn!("Component shutdown error: {}", e);
            }
        }

        Ok(())
    }
}
