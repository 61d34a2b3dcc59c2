//! Adapts [`Orchestrator::handle_message`] into the `JobRunner` the thread
//! scheduler calls back into (spec.md §4.9). Holds only a weak reference so
//! `Orchestrator -> ThreadScheduler -> SchedulerBridge -> Orchestrator`
//! doesn't become a strong reference cycle.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::warn;

use relay_session::{JobRunner, ThreadJob};

use crate::handle_message::{IncomingPrompt, Orchestrator};

pub struct SchedulerBridge {
    orchestrator: Weak<Orchestrator>,
}

impl SchedulerBridge {
    pub fn new(orchestrator: &Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self { orchestrator: Arc::downgrade(orchestrator) })
    }
}

#[async_trait]
impl JobRunner for SchedulerBridge {
    async fn run(&self, job: ThreadJob) {
        let Some(orchestrator) = self.orchestrator.upgrade() else {
            warn!("orchestrator.scheduler_bridge.orchestrator_gone");
            return;
        };

        let prompt = IncomingPrompt {
            chat_id: job.chat_id,
            thread_id: None,
            reply_to_message_id: job.user_msg_id,
            text: job.text,
            reply_to_text: None,
            context: job.context,
            engine_override: None,
            thread_default_engine: Some(job.resume.engine.clone()),
            resume_override: Some(job.resume),
            resume_sink: None,
        };

        if let Err(err) = orchestrator.handle_message(prompt).await {
            warn!(%err, "orchestrator.scheduled_job_failed");
        }
    }
}
