//! Minimal HTTP front-end: a form wrapping the analysis catalog, answers
//! rendered as HTML. The snapshot is ingested once at startup and shared
//! read-only across requests.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::analysis::{Command, CATALOG};
use crate::graph::CancelToken;
use crate::store::HeapIndex;

/// The fixed port the `serve` subcommand listens on.
pub const SERVE_PORT: u16 = 8080;

/// Serve the catalog over HTTP until the process is stopped. Builds its own
/// runtime so the rest of the crate stays synchronous.
pub fn serve(index: HeapIndex) -> anyhow::Result<()> {
    let app = router(Arc::new(index));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", SERVE_PORT)).await?;
        info!("serving on http://0.0.0.0:{}", SERVE_PORT);
        axum::serve(listener, app).await?;
        Ok(())
    })
}

fn router(index: Arc<HeapIndex>) -> Router {
    Router::new().route("/", get(index_page)).with_state(index)
}

async fn index_page(State(index): State<Arc<HeapIndex>>, RawQuery(query): RawQuery) -> Response {
    let params = parse_query(query.as_deref().unwrap_or(""));

    let cmd = match params.get("cmd") {
        None => return Html(form_page()).into_response(),
        Some(raw) => match raw.parse::<i32>() {
            Ok(n) => n,
            Err(_) => return bad_request("cmd must be a command number"),
        },
    };

    let option = match params.get("option") {
        None => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => return bad_request("option must be an integer"),
        },
    };

    let command = match Command::from_number(cmd, option) {
        Some(c) => c,
        None => return bad_request("unknown command number or missing option"),
    };

    // analyses can walk the whole heap; keep them off the async workers
    let result = tokio::task::spawn_blocking(move || {
        command.run(index.as_ref(), &CancelToken::new())
    })
    .await;

    match result {
        Ok(Ok(analysis)) => Html(format!(
            "<html><body>{}<br><a href=\"/\">Back</a></body></html>",
            analysis.render_html()
        ))
        .into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_owned()).into_response()
}

fn form_page() -> String {
    let mut catalog_lines = String::new();
    for spec in CATALOG {
        let prompt = spec
            .prompt
            .map(|p| format!(" (option: {})", p))
            .unwrap_or_default();
        catalog_lines.push_str(&format!("{}. {}{}\n", spec.number, spec.name, prompt));
    }

    format!(
        "<html><body>\
         <h2>Heap dump analysis</h2>\
         <form method=\"GET\">\
         <label>Command number:</label><br>\
         <input type=\"text\" name=\"cmd\"><br><br>\
         <label>Option (commands that take one):</label><br>\
         <input type=\"text\" name=\"option\"><br><br>\
         <input type=\"submit\" value=\"Run\">\
         </form>\
         <pre>{}</pre>\
         </body></html>",
        catalog_lines
    )
}

fn parse_query(query: &str) -> HashMap<&str, &str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_is_forgiving() {
        let params = parse_query("cmd=1&option=10");
        assert_eq!(Some(&"1"), params.get("cmd"));
        assert_eq!(Some(&"10"), params.get("option"));

        let params = parse_query("");
        assert!(params.is_empty());

        let params = parse_query("cmd=&=5&cmd=8");
        assert_eq!(Some(&"8"), params.get("cmd"));
    }
}
