//! Scripted collaborators for exercising the retry and dispatch paths
#![allow(dead_code)] // Test utility module - not all helpers used in every test

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_delivery::{
    BatchOutcome, DeliveryError, DeliveryResult, NotificationSender, Payload, PushProvider,
    Receipt, ReceiptStatus, TemporaryError,
};
use herald_tokens::ScoredToken;
use parking_lot::Mutex;

/// One scripted answer from a [`ScriptedSender`]
#[derive(Debug, Clone)]
pub enum Step {
    Deliver,
    Fail(&'static str),
    Error(&'static str),
}

/// Sender answering from a script, delivering once the script runs out
#[derive(Debug, Default)]
pub struct ScriptedSender {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Payload>>,
    delay: Option<Duration>,
}

impl ScriptedSender {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Delivers every time
    pub fn delivering() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call sleeps for `delay` before answering
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(std::iter::repeat_n(Step::Fail("provider unavailable"), 64))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl NotificationSender for ScriptedSender {
    async fn send_to_users(&self, payload: &Payload) -> Result<DeliveryResult, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(payload.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.script.lock().pop_front().unwrap_or(Step::Deliver);
        match step {
            Step::Deliver => Ok(DeliveryResult::delivered(payload.user_ids.len())),
            Step::Fail(reason) => Ok(DeliveryResult::failed(reason, payload.user_ids.clone())),
            Step::Error(reason) => Err(TemporaryError::Api(reason.to_string()).into()),
        }
    }
}

/// Provider answering per token according to a rule
pub struct RuleProvider {
    rule: Box<dyn Fn(&str) -> ReceiptStatus + Send + Sync>,
    delay: Option<Duration>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl std::fmt::Debug for RuleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleProvider")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl RuleProvider {
    pub fn new(rule: impl Fn(&str) -> ReceiptStatus + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            rule: Box::new(rule),
            delay: None,
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn delivering() -> Arc<Self> {
        Self::new(|_| ReceiptStatus::Delivered)
    }

    pub fn hanging(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rule: Box::new(|_| ReceiptStatus::Delivered),
            delay: Some(delay),
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Raw tokens of every batch sent so far
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl PushProvider for RuleProvider {
    async fn send_batch(
        &self,
        tokens: &[ScoredToken],
        _payload: &Payload,
    ) -> Result<BatchOutcome, DeliveryError> {
        self.batches
            .lock()
            .push(tokens.iter().map(|t| t.token.token.clone()).collect());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        Ok(BatchOutcome {
            receipts: tokens
                .iter()
                .map(|t| Receipt {
                    token: t.token.token.clone(),
                    status: (self.rule)(&t.token.token),
                })
                .collect(),
        })
    }
}
