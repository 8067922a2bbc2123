//! JSON handlers for the bridge's HTTP surface
//!
//! Every engine call runs on the blocking pool; the engine serializes them on the
//! reader channel itself.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use mifare_classic::{Block, Error, KeyMaterial, KeyType, Sector, uid_le};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::discovery::BridgeEngine;

pub(crate) type HttpResponse = Response<Full<Bytes>>;

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Arc<BridgeEngine>,
}

impl AppState {
    pub(crate) const fn new(engine: Arc<BridgeEngine>) -> Self {
        Self { engine }
    }
}

/// Failure rendered as `{success:false, error[, status]}`
#[derive(Debug)]
struct ApiError {
    code: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            body: json!({ "success": false, "error": message.into() }),
        }
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found")
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = match &error {
            Error::NoCard | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut this = Self::new(code, error.to_string());
        if let Some(status) = error.status_word() {
            this.body["status"] = Value::String(status.to_string());
        }
        this
    }
}

type ApiResult = Result<Value, ApiError>;

fn to_json<T: Serialize>(value: &T) -> ApiResult {
    serde_json::to_value(value).map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode response: {e}"))
    })
}

fn default_sector() -> u32 {
    1
}

fn default_key_type() -> String {
    KeyType::A.to_string()
}

fn default_key() -> String {
    KeyMaterial::FACTORY_DEFAULT.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectorRequest {
    #[serde(default = "default_sector")]
    sector_number: u32,
    #[serde(default = "default_key_type")]
    key_type: String,
    #[serde(default = "default_key")]
    key: String,
    #[serde(default)]
    data_blocks: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockRequest {
    block_number: Option<u32>,
    #[serde(default = "default_key_type")]
    key_type: String,
    #[serde(default = "default_key")]
    key: String,
    data: Option<String>,
}

/// Key type and key of a request, validated before the card is touched
fn credentials(key_type: &str, key: &str) -> Result<(KeyType, KeyMaterial), Error> {
    Ok((key_type.parse()?, key.parse()?))
}

impl SectorRequest {
    fn parse(&self) -> Result<(Sector, KeyType, KeyMaterial), Error> {
        let (key_type, key) = credentials(&self.key_type, &self.key)?;
        Ok((Sector::new(self.sector_number)?, key_type, key))
    }
}

impl BlockRequest {
    fn parse(&self) -> Result<(Block, KeyType, KeyMaterial), Error> {
        let number = self
            .block_number
            .ok_or_else(|| Error::invalid_input("blockNumber is required"))?;
        let (key_type, key) = credentials(&self.key_type, &self.key)?;
        Ok((Block::new(number)?, key_type, key))
    }
}

/// An empty body means "all defaults"
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    let body = if body.iter().all(u8::is_ascii_whitespace) { b"{}".as_slice() } else { body };
    serde_json::from_slice(body).map_err(|e| Error::invalid_input(format!("Malformed JSON body: {e}")))
}

async fn blocking<R, F>(state: &AppState, f: F) -> Result<R, ApiError>
where
    R: Send + 'static,
    F: FnOnce(&BridgeEngine) -> mifare_classic::Result<R> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(engine.as_ref()))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Engine task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn read_sector(state: &AppState, body: &[u8]) -> ApiResult {
    let (sector, key_type, key) = parse_body::<SectorRequest>(body)?.parse()?;
    let results = blocking(state, move |engine| engine.read_sector(sector, key_type, key)).await?;
    let successful = results.iter().filter(|o| o.is_success()).count();

    Ok(json!({
        "success": true,
        "sectorNumber": sector,
        "keyType": key_type,
        "results": to_json(&results)?,
        "totalBlocks": results.len(),
        "successfulReads": successful,
    }))
}

async fn write_sector(state: &AppState, body: &[u8]) -> ApiResult {
    let request = parse_body::<SectorRequest>(body)?;
    let (sector, key_type, key) = request.parse()?;
    let data_blocks = request.data_blocks;
    let results = blocking(state, move |engine| {
        engine.write_sector(sector, key_type, key, &data_blocks)
    })
    .await?;
    let successful = results.iter().filter(|o| o.is_success()).count();

    Ok(json!({
        "success": true,
        "sectorNumber": sector,
        "keyType": key_type,
        "results": to_json(&results)?,
        "totalBlocks": results.len(),
        "successfulWrites": successful,
    }))
}

async fn read_block(state: &AppState, body: &[u8]) -> ApiResult {
    let (block, key_type, key) = parse_body::<BlockRequest>(body)?.parse()?;
    let access = blocking(state, move |engine| engine.read_single_block(block, key_type, key)).await?;

    Ok(json!({
        "success": true,
        "blockNumber": block,
        "data": access.data.to_string(),
        "ascii": access.data.ascii(),
        "authMethod": access.auth_method,
        "keyUsed": access.key_used.to_string(),
    }))
}

async fn write_block(state: &AppState, body: &[u8]) -> ApiResult {
    let request = parse_body::<BlockRequest>(body)?;
    let (block, key_type, key) = request.parse()?;
    let data = request
        .data
        .ok_or_else(|| Error::invalid_input("data is required"))?;
    let access = blocking(state, move |engine| {
        engine.write_single_block(block, key_type, key, &data)
    })
    .await?;

    Ok(json!({
        "success": true,
        "blockNumber": block,
        "data": access.data.to_string(),
        "authMethod": access.auth_method,
    }))
}

async fn debug_card(state: &AppState) -> ApiResult {
    let scan = blocking(state, |engine| engine.debug_card()).await?;
    Ok(json!({ "success": true, "debug": to_json(&scan)? }))
}

fn reader_status(state: &AppState) -> ApiResult {
    let status = state.engine.adapter().status();
    Ok(json!({
        "success": true,
        "readerDetected": status.reader_detected,
        "cardPresent": status.card_present,
        "readerName": status.reader_name,
        "cardUID": status.card_uid,
    }))
}

fn service_status(state: &AppState) -> ApiResult {
    let adapter = state.engine.adapter();
    Ok(json!({
        "status": "running",
        "message": "MIFARE bridge is running",
        "readerDetected": adapter.is_reader_present(),
        "cardPresent": adapter.is_card_present(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn card_info(state: &AppState) -> ApiResult {
    let info = blocking(state, |engine| engine.card_info()).await?;
    to_json(&info)
}

async fn read_uid(state: &AppState) -> ApiResult {
    let uid = blocking(state, |engine| engine.read_uid()).await?;
    Ok(json!({ "uid": hex::encode_upper(uid) }))
}

async fn read_uid_le(state: &AppState) -> ApiResult {
    let uid = blocking(state, |engine| engine.read_uid()).await?;
    to_json(&uid_le(&uid))
}

fn with_cors(mut response: HttpResponse) -> HttpResponse {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE"),
    );
    response
}

fn json_response(code: StatusCode, body: &Value) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    with_cors(response)
}

/// Route one request whose body has already been collected
pub(crate) async fn dispatch(state: &AppState, method: &Method, path: &str, body: &[u8]) -> HttpResponse {
    let result = match (method, path) {
        (&Method::OPTIONS, _) => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NO_CONTENT;
            return with_cors(response);
        }
        (&Method::POST, "/read-sector") => read_sector(state, body).await,
        (&Method::POST, "/write-sector") => write_sector(state, body).await,
        (&Method::POST, "/read-block") => read_block(state, body).await,
        (&Method::POST, "/write-block") => write_block(state, body).await,
        (&Method::POST, "/debug-card") => debug_card(state).await,
        (&Method::GET, "/reader-status") => reader_status(state),
        (&Method::GET, "/status") => service_status(state),
        (&Method::GET, "/card-info") => card_info(state).await,
        (&Method::GET, "/read-uid") => read_uid(state).await,
        (&Method::GET, "/read-uid-le") => read_uid_le(state).await,
        _ => Err(ApiError::not_found()),
    };

    match result {
        Ok(body) => {
            debug!(%method, path, "Request handled");
            json_response(StatusCode::OK, &body)
        }
        Err(error) => {
            if error.code.is_server_error() {
                warn!(%method, path, code = %error.code, body = %error.body, "Request failed");
            } else {
                debug!(%method, path, code = %error.code, "Request rejected");
            }
            json_response(error.code, &error.body)
        }
    }
}

pub(crate) async fn handle(state: AppState, request: Request<Incoming>) -> Result<HttpResponse, Infallible> {
    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let error = ApiError::new(StatusCode::BAD_REQUEST, format!("Failed to read request body: {e}"));
            return Ok(json_response(error.code, &error.body));
        }
    };

    Ok(dispatch(&state, &parts.method, parts.uri.path(), &body).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mifare_classic::simulator::{AcceptedForms, SimulatedCard, SimulatorHandle};
    use mifare_classic::{BlockData, EngineConfig, StatusWord, TransportAdapter};

    use crate::discovery::BridgeTransport;

    fn state_with_card() -> (AppState, SimulatorHandle) {
        state_with(SimulatedCard::new())
    }

    fn state_with(card: SimulatedCard) -> (AppState, SimulatorHandle) {
        let handle = card.handle();
        let adapter = Arc::new(TransportAdapter::new());
        adapter.on_reader_attached("Sim Reader", Box::new(card) as BridgeTransport);
        adapter.on_card_inserted(handle.atr());
        let engine = Arc::new(BridgeEngine::new(adapter, EngineConfig::default()));
        (AppState::new(engine), handle)
    }

    fn state_without_reader() -> AppState {
        AppState::new(Arc::new(BridgeEngine::new(
            Arc::new(TransportAdapter::new()),
            EngineConfig::default(),
        )))
    }

    async fn call(state: &AppState, method: Method, path: &str, body: &str) -> (StatusCode, Value) {
        let response = dispatch(state, &method, path, body.as_bytes()).await;
        let code = response.status();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (code, value)
    }

    #[tokio::test]
    async fn test_read_sector_defaults() {
        let (state, handle) = state_with_card();
        let mut content = [0u8; 16];
        content[..5].copy_from_slice(b"hello");
        handle.set_block(Block::from(4), BlockData::new(content));

        let (code, body) = call(&state, Method::POST, "/read-sector", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["sectorNumber"], 1);
        assert_eq!(body["keyType"], "A");
        assert_eq!(body["totalBlocks"], 3);
        assert_eq!(body["successfulReads"], 3);

        let first = &body["results"][0];
        assert_eq!(first["blockNumber"], 4);
        assert_eq!(first["blockHex"], "04");
        assert_eq!(first["ascii"], "hello...........");
        assert_eq!(first["dataType"], "Data");
        assert_eq!(first["authMethod"], "modern-trailer-key-a");
        assert_eq!(first["keyUsed"], "FFFFFFFFFFFF");
        assert_eq!(body["results"][1]["dataType"], "Empty");
    }

    #[tokio::test]
    async fn test_read_sector_exhausted_reports_blocks() {
        let (state, handle) = state_with_card();
        handle.accept(KeyType::A, AcceptedForms::NONE);
        handle.accept(KeyType::B, AcceptedForms::NONE);

        let (code, body) = call(
            &state,
            Method::POST,
            "/read-sector",
            r#"{"sectorNumber": 2, "keyType": "A", "key": "A0A1A2A3A4A5"}"#,
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["successfulReads"], 0);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        for (outcome, block) in results.iter().zip([8, 9, 10]) {
            assert_eq!(outcome["blockNumber"], block);
            assert_eq!(outcome["success"], false);
            assert_eq!(outcome["status"], "6300");
        }
    }

    #[tokio::test]
    async fn test_write_sector_then_read_back() {
        let (state, handle) = state_with_card();
        let body = r#"{
            "sectorNumber": 3,
            "keyType": "B",
            "key": "FFFFFFFFFFFF",
            "dataBlocks": [
                "00112233445566778899AABBCCDDEEFF",
                "000102030405060708090A0B0C0D0E0F",
                "FFEEDDCCBBAA99887766554433221100"
            ]
        }"#;
        let (code, response) = call(&state, Method::POST, "/write-sector", body).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(response["successfulWrites"], 3);
        assert_eq!(response["results"][2]["blockNumber"], 14);
        assert_eq!(
            handle.block(Block::from(13)).to_string(),
            "000102030405060708090A0B0C0D0E0F"
        );
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_any_exchange() {
        let (state, handle) = state_with_card();
        handle.clear_trace();

        let cases = [
            ("/read-sector", r#"{"key": "FFFF"}"#),
            ("/read-sector", r#"{"keyType": "C"}"#),
            ("/read-sector", r#"{"sectorNumber": 64}"#),
            ("/read-sector", "{not json"),
            ("/write-sector", r#"{"dataBlocks": ["00"]}"#),
            ("/write-sector", r#"{"dataBlocks": []}"#),
            ("/read-block", r#"{"keyType": "A"}"#),
            ("/write-block", r#"{"blockNumber": 4}"#),
            ("/write-block", r#"{"blockNumber": 4, "data": "ZZ112233445566778899AABBCCDDEEFF"}"#),
            ("/write-block", r#"{"blockNumber": 7, "data": "00112233445566778899AABBCCDDEEFF"}"#),
        ];
        for (path, body) in cases {
            let (code, response) = call(&state, Method::POST, path, body).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "{path} {body}");
            assert_eq!(response["success"], false);
            assert!(response["error"].as_str().unwrap().starts_with("Invalid input"));
        }
        assert!(handle.trace().is_empty());
    }

    #[tokio::test]
    async fn test_block_routes() {
        let (state, handle) = state_with_card();

        let (code, body) = call(
            &state,
            Method::POST,
            "/write-block",
            r#"{"blockNumber": 5, "data": "48656C6C6F0000000000000000000000"}"#,
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["authMethod"], "modern-block-key-a");
        assert_eq!(handle.block(Block::from(5)).ascii(), "Hello...........");

        let (code, body) = call(&state, Method::POST, "/read-block", r#"{"blockNumber": 5}"#).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["blockNumber"], 5);
        assert_eq!(body["data"], "48656C6C6F0000000000000000000000");
        assert_eq!(body["ascii"], "Hello...........");
    }

    #[tokio::test]
    async fn test_block_failure_carries_status() {
        let (state, handle) = state_with_card();
        handle.fail_next_read(Block::from(6), StatusWord::new(0x69, 0x81));

        let (code, body) = call(&state, Method::POST, "/read-block", r#"{"blockNumber": 6}"#).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], "6981");
        assert_eq!(body["error"], "Read failed for block 6 with status: 6981");
    }

    #[tokio::test]
    async fn test_no_reader_and_no_card() {
        let state = state_without_reader();
        let (code, body) = call(&state, Method::POST, "/read-sector", "{}").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "No NFC reader detected");

        let (state, _handle) = state_with_card();
        state.engine.adapter().on_card_removed();
        let (code, body) = call(&state, Method::GET, "/card-info", "").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No card present");

        let (code, _) = call(&state, Method::GET, "/read-uid", "").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_routes() {
        let (state, _handle) = state_with_card();

        let (code, body) = call(&state, Method::GET, "/reader-status", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["readerDetected"], true);
        assert_eq!(body["cardPresent"], true);
        assert_eq!(body["readerName"], "Sim Reader");
        assert_eq!(body["cardUID"], Value::Null);

        let (_, body) = call(&state, Method::GET, "/read-uid", "").await;
        assert_eq!(body["uid"], "04A1B2C3");
        let (_, body) = call(&state, Method::GET, "/reader-status", "").await;
        assert_eq!(body["cardUID"], "04A1B2C3");

        let (_, body) = call(&state, Method::GET, "/read-uid-le", "").await;
        assert_eq!(body["uid_le"], "C3B2A104");
        assert_eq!(body["decimal"], 0xC3B2_A104u64);

        let (_, body) = call(&state, Method::GET, "/card-info", "").await;
        assert_eq!(body["uid"], "04A1B2C3");
        assert_eq!(body["type"], "MIFARE Classic 1K");

        let (code, body) = call(&state, Method::GET, "/status", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_ten_byte_uid_routes() {
        let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99];
        let (state, _handle) = state_with(SimulatedCard::with_uid(uid));

        let (code, body) = call(&state, Method::GET, "/read-uid", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["uid"], "04112233445566778899");

        let (code, body) = call(&state, Method::GET, "/read-uid-le", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["uid_le"], "99887766554433221104");
        assert_eq!(body["decimal"], "725039432730969758634244");

        let (code, body) = call(&state, Method::GET, "/card-info", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["uid"], "04112233445566778899");
    }

    #[tokio::test]
    async fn test_seven_byte_uid_decimal_is_numeric() {
        let (state, _handle) = state_with(SimulatedCard::with_uid([0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));

        let (code, body) = call(&state, Method::GET, "/read-uid-le", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["uid_le"], "66554433221104");
        assert_eq!(body["decimal"], 0x0066_5544_3322_1104u64);
    }

    #[tokio::test]
    async fn test_debug_card_route() {
        let (state, _handle) = state_with_card();
        let (code, body) = call(&state, Method::POST, "/debug-card", "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["debug"]["cardPresent"], true);
        let sectors = body["debug"]["sectors"].as_array().unwrap();
        assert_eq!(sectors.len(), 16);
        assert_eq!(sectors[1]["trailerBlock"], 7);
        assert_eq!(sectors[1]["keyA"], true);
        assert_eq!(sectors[1]["readable"], json!([4, 5, 6]));
    }

    #[tokio::test]
    async fn test_preflight_and_unknown_route() {
        let (state, _handle) = state_with_card();
        let (code, body) = call(&state, Method::OPTIONS, "/read-sector", "").await;
        assert_eq!(code, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (code, body) = call(&state, Method::GET, "/nope", "").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }
}
