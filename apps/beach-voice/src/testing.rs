//! In-memory collaborators for tests and local development without network
//! access to the realtime API or a real ICE agent.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::credentials::{CredentialError, CredentialIssuer, EphemeralKey};
use crate::peer::{CandidateSink, IceSettings, PeerConnector, PeerError, PeerLink};
use crate::protocol::{LocalCandidate, RemoteCandidate};

/// Returns a fixed outcome for every credential request.
pub struct StaticIssuer {
    key: Option<EphemeralKey>,
}

impl StaticIssuer {
    pub fn issuing(key: &str, expires_at: i64) -> Self {
        Self {
            key: Some(EphemeralKey {
                key: key.to_string(),
                expires_at,
            }),
        }
    }

    /// Behaves like an upstream reply without `client_secret`.
    pub fn without_secret() -> Self {
        Self { key: None }
    }
}

#[async_trait]
impl CredentialIssuer for StaticIssuer {
    async fn issue(&self) -> Result<EphemeralKey, CredentialError> {
        self.key.clone().ok_or(CredentialError::MissingClientSecret)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    SetRemote(String),
    CreateAnswer,
    SetLocal(String),
    AddCandidate(RemoteCandidate),
    Close,
}

#[derive(Default)]
struct LinkLog {
    steps: Vec<MockStep>,
    remote_set: bool,
    closed: bool,
}

/// Scripted peer connection. Offers must start with `v=0` to be accepted and
/// candidates must start with `candidate:`.
pub struct MockLink {
    answer: String,
    fail_create_answer: bool,
    local_candidates: Vec<String>,
    sink: CandidateSink,
    log: Mutex<LinkLog>,
}

impl MockLink {
    pub fn steps(&self) -> Vec<MockStep> {
        self.log.lock().steps.clone()
    }

    pub fn added_candidates(&self) -> Vec<String> {
        self.log
            .lock()
            .steps
            .iter()
            .filter_map(|step| match step {
                MockStep::AddCandidate(candidate) => Some(candidate.candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().closed
    }

    fn mock_failure() -> PeerError {
        PeerError::Rejected("mock peer failure".to_string())
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn set_remote_description(&self, offer_sdp: &str) -> Result<(), PeerError> {
        let mut log = self.log.lock();
        log.steps.push(MockStep::SetRemote(offer_sdp.to_string()));
        if !offer_sdp.starts_with("v=0") {
            return Err(Self::mock_failure());
        }
        log.remote_set = true;
        drop(log);

        for candidate in &self.local_candidates {
            let _ = self.sink.send(LocalCandidate {
                candidate: candidate.clone(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            });
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<String, PeerError> {
        self.log.lock().steps.push(MockStep::CreateAnswer);
        if self.fail_create_answer {
            return Err(Self::mock_failure());
        }
        Ok(self.answer.clone())
    }

    async fn set_local_description(&self, answer_sdp: &str) -> Result<(), PeerError> {
        self.log
            .lock()
            .steps
            .push(MockStep::SetLocal(answer_sdp.to_string()));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RemoteCandidate) -> Result<(), PeerError> {
        let mut log = self.log.lock();
        if !log.remote_set || !candidate.candidate.starts_with("candidate:") {
            return Err(Self::mock_failure());
        }
        log.steps.push(MockStep::AddCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        let mut log = self.log.lock();
        log.steps.push(MockStep::Close);
        log.closed = true;
        Ok(())
    }
}

/// Hands out [`MockLink`]s and remembers every one it opened.
#[derive(Clone)]
pub struct MockConnector {
    answer: String,
    fail_create_answer: bool,
    local_candidates: Vec<String>,
    links: Arc<Mutex<Vec<Arc<MockLink>>>>,
    last_ice: Arc<Mutex<Option<IceSettings>>>,
}

impl MockConnector {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            fail_create_answer: false,
            local_candidates: Vec::new(),
            links: Arc::new(Mutex::new(Vec::new())),
            last_ice: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing_create_answer(mut self) -> Self {
        self.fail_create_answer = true;
        self
    }

    /// Candidates "discovered" as soon as the remote description is applied.
    pub fn with_local_candidates(mut self, candidates: &[&str]) -> Self {
        self.local_candidates = candidates.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn opened(&self) -> usize {
        self.links.lock().len()
    }

    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        self.links.lock().last().cloned()
    }

    pub fn last_ice(&self) -> Option<IceSettings> {
        self.last_ice.lock().clone()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn open(
        &self,
        ice: &IceSettings,
        candidates: CandidateSink,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        *self.last_ice.lock() = Some(ice.clone());
        let link = Arc::new(MockLink {
            answer: self.answer.clone(),
            fail_create_answer: self.fail_create_answer,
            local_candidates: self.local_candidates.clone(),
            sink: candidates,
            log: Mutex::new(LinkLog::default()),
        });
        self.links.lock().push(link.clone());
        Ok(link)
    }
}
