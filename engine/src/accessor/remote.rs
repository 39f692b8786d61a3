use super::{DataAccessor, SourceChange, Transport, TransportRequest};
use crate::{
    error::Result,
    event::EventEmitter,
    query::{FetchParam, FetchRange, FetchResult, SearchParam, SearchResult},
    CancellableFuture, EditLedger, Error, Record,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// Request builder and response decoder for one accessor operation.
pub struct Adapter<P: ?Sized, R> {
    request: Arc<dyn Fn(&P) -> Result<TransportRequest> + Send + Sync>,
    response: Arc<dyn Fn(Value) -> Result<R> + Send + Sync>,
}

impl<P: ?Sized, R> Adapter<P, R> {
    pub fn new(
        request: impl Fn(&P) -> Result<TransportRequest> + Send + Sync + 'static,
        response: impl Fn(Value) -> Result<R> + Send + Sync + 'static,
    ) -> Self {
        Self {
            request: Arc::new(request),
            response: Arc::new(response),
        }
    }
}

impl<P: ?Sized, R> Clone for Adapter<P, R> {
    fn clone(&self) -> Self {
        Self {
            request: Arc::clone(&self.request),
            response: Arc::clone(&self.response),
        }
    }
}

/// Parameters of a fetch, as handed to the fetch adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub fetch_param: FetchParam,
    #[serde(flatten)]
    pub range: FetchRange,
}

/// Adapters for every operation. Commit is optional.
#[derive(Clone)]
pub struct RemoteConfig {
    pub search: Adapter<SearchParam, SearchResult>,
    pub fetch: Adapter<FetchRequest, FetchResult>,
    pub find: Adapter<str, Option<Record>>,
    pub commit: Option<Adapter<EditLedger, Value>>,
}

impl RemoteConfig {
    /// Adapters for the JSON-over-HTTP protocol served by `gridsync-server`.
    pub fn rest(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();

        let search_url = format!("{base}/search");
        let fetch_url = format!("{base}/fetch");
        let records_url = format!("{base}/records");
        let commit_url = format!("{base}/commit");

        Self {
            search: Adapter::new(
                move |param: &SearchParam| {
                    let body = to_body(&param.to_spec()?)?;
                    Ok(TransportRequest::post(search_url.as_str(), body))
                },
                decode,
            ),
            fetch: Adapter::new(
                move |request: &FetchRequest| {
                    Ok(TransportRequest::post(fetch_url.as_str(), to_body(request)?))
                },
                decode,
            ),
            find: Adapter::new(
                move |id: &str| {
                    Ok(TransportRequest::get(format!(
                        "{records_url}/{}",
                        encode_segment(id)
                    )))
                },
                |body| match body {
                    Value::Null => Ok(None),
                    record @ Value::Object(_) => Ok(Some(record)),
                    other => Err(Error::InvalidResponse(format!(
                        "expected a record object, got {other}"
                    ))),
                },
            ),
            commit: Some(Adapter::new(
                move |ledger: &EditLedger| {
                    Ok(TransportRequest::post(
                        commit_url.as_str(),
                        to_body(&ledger.calc_patch())?,
                    ))
                },
                Ok,
            )),
        }
    }
}

fn to_body<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::NotSupported(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// Percent-encode everything outside the URL unreserved set.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

/// Accessor backed by a network endpoint.
pub struct RemoteAccessor {
    config: RemoteConfig,
    transport: Arc<dyn Transport>,
    events: EventEmitter<SourceChange>,
}

impl RemoteAccessor {
    pub fn new(config: RemoteConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            events: EventEmitter::new(),
        }
    }

    /// Accessor speaking the default REST protocol under `base_url`.
    pub fn rest(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self::new(RemoteConfig::rest(base_url), transport)
    }

    /// Announce a change pushed by the backend.
    pub fn notify_change(&self, change: SourceChange) {
        debug!(change_type = ?change.change_type, ids = change.record_ids.len(), "remote change");
        self.events.emit(&change);
    }

    fn call<P, R>(&self, adapter: &Adapter<P, R>, param: &P) -> CancellableFuture<R>
    where
        P: ?Sized,
        R: Send + 'static,
    {
        let request = match (adapter.request)(param) {
            Ok(request) => request,
            Err(err) => return CancellableFuture::rejected(err),
        };
        let response = Arc::clone(&adapter.response);
        self.transport.send(request).map(move |body| response(body))
    }
}

impl DataAccessor for RemoteAccessor {
    fn search(&self, param: &SearchParam) -> CancellableFuture<SearchResult> {
        self.call(&self.config.search, param)
    }

    fn fetch(&self, param: &FetchParam, range: FetchRange) -> CancellableFuture<FetchResult> {
        let request = FetchRequest {
            fetch_param: param.clone(),
            range,
        };
        self.call(&self.config.fetch, &request)
    }

    fn find(&self, id: &str) -> CancellableFuture<Option<Record>> {
        self.call(&self.config.find, id)
    }

    fn commit(&self, ledger: &EditLedger) -> CancellableFuture<Value> {
        match &self.config.commit {
            Some(adapter) => self.call(adapter, ledger),
            None => CancellableFuture::rejected(Error::NotSupported(
                "commit is not configured".to_string(),
            )),
        }
    }

    fn events(&self) -> &EventEmitter<SourceChange> {
        &self.events
    }
}
