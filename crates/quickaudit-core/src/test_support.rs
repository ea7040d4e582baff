//! In-memory doubles for the remote API and realtime transport.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::RemoteApi;
use crate::error::{Error, Result};
use crate::realtime::{Connection, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create(String),
    Update(String),
    Delete(String),
    Fetch(String),
    List(String),
}

/// Remote API backed by a map of item endpoint to record.
#[derive(Default)]
pub struct MockRemoteApi {
    records: Mutex<BTreeMap<String, Value>>,
    calls: Mutex<Vec<RemoteCall>>,
    failing: Mutex<BTreeSet<String>>,
    fail_all: Mutex<bool>,
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_record(&self, endpoint: &str, record: Value) {
        self.records
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), record);
    }

    pub fn record(&self, endpoint: &str) -> Option<Value> {
        self.records.lock().unwrap().get(endpoint).cloned()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every call to `endpoint` fail until cleared.
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
        self.set_fail_all(false);
    }

    fn call(&self, call: RemoteCall, endpoint: &str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(endpoint) {
            return Err(Error::Transport(format!("mock failure for {endpoint}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn create(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        self.call(RemoteCall::Create(endpoint.to_string()), endpoint)?;
        let id = payload["id"].as_str().unwrap_or_default();
        self.put_record(
            &format!("{endpoint}/{}", urlencoding::encode(id)),
            payload.clone(),
        );
        Ok(payload.clone())
    }

    async fn update(&self, endpoint: &str, payload: &Value) -> Result<Value> {
        self.call(RemoteCall::Update(endpoint.to_string()), endpoint)?;
        self.put_record(endpoint, payload.clone());
        Ok(payload.clone())
    }

    async fn delete(&self, endpoint: &str) -> Result<()> {
        self.call(RemoteCall::Delete(endpoint.to_string()), endpoint)?;
        self.records.lock().unwrap().remove(endpoint);
        Ok(())
    }

    async fn fetch(&self, endpoint: &str) -> Result<Option<Value>> {
        self.call(RemoteCall::Fetch(endpoint.to_string()), endpoint)?;
        Ok(self.record(endpoint))
    }

    async fn list(&self, endpoint: &str) -> Result<Vec<Value>> {
        self.call(RemoteCall::List(endpoint.to_string()), endpoint)?;
        let prefix = format!("{endpoint}/");
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }
}

/// Scripted outcome of one `Transport::connect` call.
enum ConnectScript {
    /// Connect succeeds with the next pending session
    Accept,
    Refuse,
}

/// Test side of an accepted mock connection.
pub struct MockSessionHandle {
    /// Push inbound messages; `Err` simulates a socket error.
    pub inbound: mpsc::UnboundedSender<Result<String>>,
    /// Messages the channel sent.
    pub outbound: mpsc::UnboundedReceiver<String>,
}

pub struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Result<String>>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Transport whose connects follow a script; unscripted connects are refused.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<ConnectScript>>,
    pending_sessions: Mutex<VecDeque<MockConnection>>,
    connects: Mutex<Vec<(Instant, String)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an accepted connection and return the test-side handle.
    pub fn accept_next(&self) -> MockSessionHandle {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.pending_sessions.lock().unwrap().push_back(MockConnection {
            inbound: inbound_rx,
            outbound: outbound_tx,
        });
        self.script.lock().unwrap().push_back(ConnectScript::Accept);
        MockSessionHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
        }
    }

    pub fn refuse_next(&self) {
        self.script.lock().unwrap().push_back(ConnectScript::Refuse);
    }

    /// Time and token of every connect attempt.
    pub fn connects(&self) -> Vec<(Instant, String)> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str, token: &str) -> Result<Box<dyn Connection>> {
        self.connects
            .lock()
            .unwrap()
            .push((Instant::now(), token.to_string()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ConnectScript::Accept) => {
                let connection = self
                    .pending_sessions
                    .lock()
                    .unwrap()
                    .pop_front()
                    .expect("accepted connect without a session");
                Ok(Box::new(connection))
            }
            Some(ConnectScript::Refuse) | None => {
                Err(Error::Transport("mock connection refused".to_string()))
            }
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| Error::Transport("mock peer gone".to_string()))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
