//! Responses produced locally when neither network nor cache can answer.

use crate::cache::CachedResponse;

/// Body of the JSON offline error.
pub const OFFLINE_JSON_BODY: &str = r#"{"error":"offline"}"#;

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline - Delivery Map</title>
  <style>
    body {
      font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
      display: flex;
      flex-direction: column;
      align-items: center;
      justify-content: center;
      min-height: 100vh;
      margin: 0;
      background: linear-gradient(135deg, #1e3a5f 0%, #0f172a 100%);
      color: white;
      text-align: center;
      padding: 20px;
    }
    p { font-size: 1.2rem; opacity: 0.8; max-width: 400px; }
    .info { font-size: 0.9rem; opacity: 0.6; margin-top: 1rem; }
    button {
      margin-top: 2rem;
      padding: 12px 24px;
      font-size: 1rem;
      background: #3b82f6;
      color: white;
      border: none;
      border-radius: 8px;
      cursor: pointer;
    }
    button:hover { background: #2563eb; }
  </style>
</head>
<body>
  <h1>You are offline</h1>
  <p>The app has to be loaded online at least once before it can work offline.</p>
  <p class="info">Connect to the internet and reload the page.</p>
  <button onclick="location.reload()">Try again</button>
</body>
</html>
"#;

fn header(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

/// Static offline document for navigations with nothing cached.
pub fn offline_page() -> CachedResponse {
    CachedResponse::new(
        200,
        vec![
            header("content-type", "text/html; charset=utf-8"),
            header("cache-control", "no-store"),
        ],
        OFFLINE_PAGE,
    )
}

/// `503 {"error":"offline"}`.
pub fn offline_json() -> CachedResponse {
    CachedResponse::new(
        503,
        vec![header("content-type", "application/json")],
        OFFLINE_JSON_BODY,
    )
}

/// Empty `503`.
pub fn unavailable() -> CachedResponse {
    CachedResponse::new(503, vec![], "")
}

/// `502` in the server's JSON error envelope, for failed pass-throughs.
pub fn bad_gateway(message: &str) -> CachedResponse {
    let body = serde_json::json!({
        "error": "bad_gateway",
        "message": message,
        "status": 502,
    });
    CachedResponse::new(
        502,
        vec![header("content-type", "application/json")],
        body.to_string(),
    )
}
