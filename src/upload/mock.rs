//! Mock destination adapter.
//!
//! Deterministic external ids (`mock-<activity_id>`), fault injection for
//! testing partial fan-outs, and an in-memory record of every call. Also the
//! reference implementation of the adapter contract.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::activity::Destination;
use crate::types::{Error, Result};

use super::{DestinationUploader, RemoteActivity, UpdatePatch, UploadContext, UploadReceipt};

/// How the mock behaves on vendor calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMode {
    Succeed,
    /// Every call answers with this HTTP status.
    FailHttp(u16),
}

/// One recorded vendor call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Create { external_id: String },
    Update { external_id: String, patch: UpdatePatch },
}

/// Mock adapter, usable for any destination.
#[derive(Debug)]
pub struct MockUploader {
    destination: Destination,
    mode: MockMode,
    /// Remote description state served to update merges.
    remote: Mutex<RemoteActivity>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockUploader {
    pub fn new(destination: Destination, mode: MockMode) -> Self {
        Self {
            destination,
            mode,
            remote: Mutex::new(RemoteActivity::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(destination: Destination) -> Self {
        Self::new(destination, MockMode::Succeed)
    }

    pub fn failing(destination: Destination, status: u16) -> Self {
        Self::new(destination, MockMode::FailHttp(status))
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The simulated remote activity state.
    pub fn remote(&self) -> RemoteActivity {
        self.remote.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_mode(&self) -> Result<()> {
        match self.mode {
            MockMode::Succeed => Ok(()),
            MockMode::FailHttp(status) => Err(Error::vendor_api(
                status,
                format!("mock {} upstream failure", self.destination),
            )),
        }
    }
}

#[async_trait]
impl DestinationUploader for MockUploader {
    fn destination(&self) -> Destination {
        self.destination
    }

    async fn create(&self, ctx: &UploadContext<'_>) -> Result<UploadReceipt> {
        self.check_mode()?;

        let external_id = format!("mock-{}", ctx.envelope.activity_id);
        {
            let mut remote = self.remote.lock().unwrap_or_else(|e| e.into_inner());
            remote.name = ctx.envelope.name.clone();
            remote.description = ctx.envelope.description.clone();
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall::Create {
                external_id: external_id.clone(),
            });

        Ok(UploadReceipt { external_id })
    }

    async fn remote_state(
        &self,
        _ctx: &UploadContext<'_>,
        _external_id: &str,
    ) -> Result<RemoteActivity> {
        self.check_mode()?;
        Ok(self.remote())
    }

    async fn update(
        &self,
        _ctx: &UploadContext<'_>,
        external_id: &str,
        patch: &UpdatePatch,
    ) -> Result<UploadReceipt> {
        self.check_mode()?;

        {
            let mut remote = self.remote.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(name) = &patch.name {
                remote.name = name.clone();
            }
            if let Some(description) = &patch.description {
                remote.description = description.clone();
            }
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockCall::Update {
                external_id: external_id.to_string(),
                patch: patch.clone(),
            });

        Ok(UploadReceipt {
            external_id: external_id.to_string(),
        })
    }
}
