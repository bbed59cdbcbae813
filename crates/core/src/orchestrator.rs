//! Resolves inbound tool-call batches.
//!
//! A single worker task takes batches off a queue and works through each one
//! item by item: commands go through the safety policy and the process engine,
//! elevation calls through a credential prompt. Human decisions arrive through
//! [`OrchestratorHandle`] as one-shot replies keyed by call id. When every item
//! is resolved the results go back to the agent as one `tool` message.

use crate::connection::{MessageSender, SEND_ERROR_CODE};
use crate::usage::refresh_usage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use techie_executor::{normalize, ElevationCredential, ExecError, ProcessEngine};
use techie_interfaces::{ClientEvent, CommandState, EventSink, UsageReporter};
use techie_policy::{requires_approval, SafetySettings};
use techie_protocol::{
    truncate_utf8, ClientMessage, CommandCall, CommandResult, ElevationCall, ElevationResult,
    ToolCall, ToolResult, TOOL_OUTPUT_LIMIT,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// One inbound `tool` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBatch {
    pub conversation_id: String,
    pub tools: Vec<ToolCall>,
}

/// Outstanding human decisions. A batch only registers waits while its
/// epoch is current.
#[derive(Default)]
struct Waits {
    approvals: HashMap<String, oneshot::Sender<bool>>,
    credential: Option<oneshot::Sender<Option<ElevationCredential>>>,
}

pub struct Orchestrator {
    engine: Arc<ProcessEngine>,
    settings: Arc<dyn SafetySettings>,
    sender: Arc<dyn MessageSender>,
    usage: Arc<dyn UsageReporter>,
    events: Arc<dyn EventSink>,
    waits: Arc<Mutex<Waits>>,
    /// Advances on every abandonment. Only written with `waits` locked.
    epoch: Arc<watch::Sender<u64>>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<ProcessEngine>,
        settings: Arc<dyn SafetySettings>,
        sender: Arc<dyn MessageSender>,
        usage: Arc<dyn UsageReporter>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            settings,
            sender,
            usage,
            events,
            waits: Arc::new(Mutex::new(Waits::default())),
            epoch: Arc::new(watch::channel(0).0),
        }
    }

    /// Start the batch worker. It runs until every handle is dropped.
    pub fn spawn(self) -> OrchestratorHandle {
        let (batches, rx) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle {
            batches,
            waits: Arc::clone(&self.waits),
            epoch: Arc::clone(&self.epoch),
            engine: Arc::clone(&self.engine),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(self, mut batches: mpsc::UnboundedReceiver<(u64, ToolBatch)>) {
        while let Some((epoch, batch)) = batches.recv().await {
            self.handle_batch(batch, epoch).await;
        }
        debug!("Batch worker stopped");
    }

    async fn handle_batch(&self, batch: ToolBatch, epoch: u64) {
        if self.abandoned(epoch) {
            debug!(conversation_id = %batch.conversation_id, "Skipping batch queued before a reset");
            return;
        }

        info!(
            conversation_id = %batch.conversation_id,
            calls = batch.tools.len(),
            "Processing tool batch"
        );

        let Some(results) = self.resolve(batch.tools, epoch).await else {
            info!(conversation_id = %batch.conversation_id, "Tool batch abandoned");
            return;
        };

        let reply = ClientMessage::Tool {
            conversation_id: batch.conversation_id.clone(),
            tools: results,
        };
        if let Err(e) = self.sender.send(reply).await {
            warn!(conversation_id = %batch.conversation_id, "Tool results not delivered: {}", e);
            self.events.emit(ClientEvent::ServerError {
                code: SEND_ERROR_CODE.to_string(),
                message: e.to_string(),
            });
        }

        refresh_usage(&*self.usage, &*self.events, &batch.conversation_id).await;
    }

    /// Resolve every call in order. `None` if the batch was abandoned.
    async fn resolve(&self, calls: Vec<ToolCall>, epoch: u64) -> Option<Vec<ToolResult>> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if self.abandoned(epoch) {
                return None;
            }
            let result = match call {
                ToolCall::Command(call) => ToolResult::Command(self.run_command(call, epoch).await),
                ToolCall::Elevation(call) => {
                    ToolResult::Elevation(self.request_elevation(call, epoch).await)
                }
            };
            results.push(result);
        }

        if self.abandoned(epoch) {
            return None;
        }
        Some(results)
    }

    async fn run_command(&self, call: CommandCall, epoch: u64) -> CommandResult {
        let level = self.settings.safety_level().await;
        let needs_approval = requires_approval(level, call.report.as_ref());

        if needs_approval {
            // Register before announcing so an immediate answer is not lost.
            let decision = self.wait_for_approval(&call.id, epoch);
            self.observe(&call, CommandState::PendingApproval);
            debug!(id = %call.id, level = level.as_str(), "Awaiting approval");

            let approved = match decision {
                Some(decision) => decision.await.unwrap_or(false),
                None => false,
            };
            if !approved {
                info!(id = %call.id, "Command declined");
                return self.decline(call);
            }
        }

        let mut reset = self.epoch.subscribe();
        if *reset.borrow_and_update() != epoch {
            info!(id = %call.id, "Batch abandoned before the command started");
            return self.decline(call);
        }

        self.observe(&call, CommandState::Running);

        let execution = self.engine.execute(&call.cmd, &call.id);
        tokio::pin!(execution);
        // Polled first so the process is registered before any cancel.
        let outcome = tokio::select! {
            biased;
            outcome = &mut execution => outcome,
            _ = reset.changed() => {
                info!(id = %call.id, "Stopping command of an abandoned batch");
                self.engine.cancel(&call.id);
                execution.await
            }
        };

        match outcome {
            Ok(output) => CommandResult {
                id: call.id.clone(),
                result: output.success,
                out: clip(&output.stdout),
                err: clip(&output.stderr),
                exit_code: output.exit_code,
            },
            Err(e) => {
                warn!(id = %call.id, "Command not run: {}", e);
                // Spawn and wait failures are already reported by the engine.
                if matches!(e, ExecError::NoCredential | ExecError::AlreadyRunning(_)) {
                    self.finished(&call.id, false);
                }
                CommandResult::failed(call.id.clone(), e.to_string())
            }
        }
    }

    fn decline(&self, call: CommandCall) -> CommandResult {
        self.observe(&call, CommandState::Declined);
        self.finished(&call.id, false);
        CommandResult::declined(call.id)
    }

    async fn request_elevation(&self, call: ElevationCall, epoch: u64) -> ElevationResult {
        let reply = self.wait_for_credential(epoch);
        self.events.emit(ClientEvent::CredentialRequested {
            message: call.message.clone(),
        });

        let credential = match reply {
            Some(reply) => reply.await.ok().flatten(),
            None => None,
        };

        let success = match credential {
            Some(credential) => match self.engine.validate_elevation(credential).await {
                Ok(valid) => valid,
                Err(e) => {
                    warn!(id = %call.id, "Elevation unavailable: {}", e);
                    false
                }
            },
            None => {
                info!(id = %call.id, "Credential prompt cancelled");
                false
            }
        };

        self.events.emit(ClientEvent::CredentialResult { success });
        ElevationResult {
            id: call.id,
            sudo: success,
        }
    }

    fn wait_for_approval(&self, id: &str, epoch: u64) -> Option<oneshot::Receiver<bool>> {
        let mut waits = self.waits.lock();
        if *self.epoch.borrow() != epoch {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waits.approvals.insert(id.to_string(), tx);
        Some(rx)
    }

    fn wait_for_credential(
        &self,
        epoch: u64,
    ) -> Option<oneshot::Receiver<Option<ElevationCredential>>> {
        let mut waits = self.waits.lock();
        if *self.epoch.borrow() != epoch {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waits.credential = Some(tx);
        Some(rx)
    }

    fn abandoned(&self, epoch: u64) -> bool {
        *self.epoch.borrow() != epoch
    }

    fn observe(&self, call: &CommandCall, state: CommandState) {
        self.events.emit(ClientEvent::CommandObserved {
            id: call.id.clone(),
            cmd: call.cmd.clone(),
            desc: call.desc.clone(),
            report: call.report.clone(),
            state,
        });
    }

    fn finished(&self, id: &str, success: bool) {
        self.events.emit(ClientEvent::CommandFinished {
            id: id.to_string(),
            success,
        });
    }
}

fn clip(raw: &str) -> String {
    truncate_utf8(&normalize(raw), TOOL_OUTPUT_LIMIT).to_string()
}

/// Feeds batches and human decisions to a running [`Orchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    batches: mpsc::UnboundedSender<(u64, ToolBatch)>,
    waits: Arc<Mutex<Waits>>,
    epoch: Arc<watch::Sender<u64>>,
    engine: Arc<ProcessEngine>,
}

impl OrchestratorHandle {
    /// Queue a batch behind any batch already in progress.
    pub fn submit(&self, batch: ToolBatch) -> bool {
        let epoch = *self.epoch.borrow();
        self.batches.send((epoch, batch)).is_ok()
    }

    pub fn approve(&self, id: &str) -> bool {
        self.decide(id, true)
    }

    pub fn decline(&self, id: &str) -> bool {
        self.decide(id, false)
    }

    fn decide(&self, id: &str, approved: bool) -> bool {
        let Some(decision) = self.waits.lock().approvals.remove(id) else {
            debug!(id = %id, "No approval pending");
            return false;
        };
        decision.send(approved).is_ok()
    }

    pub fn submit_credential(&self, credential: ElevationCredential) -> bool {
        self.answer_credential(Some(credential))
    }

    pub fn cancel_credential(&self) -> bool {
        self.answer_credential(None)
    }

    fn answer_credential(&self, credential: Option<ElevationCredential>) -> bool {
        let Some(reply) = self.waits.lock().credential.take() else {
            debug!("No credential prompt pending");
            return false;
        };
        reply.send(credential).is_ok()
    }

    pub fn pending_approvals(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.waits.lock().approvals.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn awaiting_credential(&self) -> bool {
        self.waits.lock().credential.is_some()
    }

    pub fn cancel_process(&self, id: &str) -> bool {
        self.engine.cancel(id)
    }

    pub fn cancel_all(&self) -> usize {
        self.engine.cancel_all()
    }

    /// Give up on the batch in progress and any still queued: pending
    /// approvals resolve as declines, a pending credential prompt as
    /// cancelled, a running command is killed, and no results are sent.
    pub fn abandon(&self) {
        let mut waits = self.waits.lock();
        self.epoch.send_modify(|epoch| *epoch += 1);
        let approvals = waits.approvals.len();
        waits.approvals.clear();
        let prompt = waits.credential.take().is_some();
        info!(approvals, prompt, "Abandoning tool batches");
    }
}
