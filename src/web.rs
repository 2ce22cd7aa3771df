// Local web view over the digest, the seen registry and the cache.

use crate::config::Config;
use crate::digest::{filter_entries, read_digest};
use crate::pipeline::{search_request, Pipeline};
use crate::store::{DirCache, JsonSeenRegistry, PaperCache, SeenStore};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Serialize)]
struct StatusMessage {
    status: String,
    message: String,
}

impl StatusMessage {
    fn ok(message: &str) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            status: "error".to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResultsQuery {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct SeenEntry {
    id: String,
    seen_at: String,
}

#[derive(Debug, Serialize)]
struct SeenSummary {
    count: usize,
    entries: Vec<SeenEntry>,
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    logs: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            logs: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn add_log(&self, message: &str) {
        let entry = format!("[{}] {}", Local::now().format("%H:%M:%S"), message);
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(entry.clone());
            if logs.len() > MAX_LOG_LINES {
                let excess = logs.len() - MAX_LOG_LINES;
                logs.drain(..excess);
            }
        }
        println!("{}", entry);
    }
}

pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let with_state = warp::any().map(move || state.clone());

    let index = warp::get()
        .and(warp::path::end())
        .map(|| warp::reply::html(INDEX_HTML).into_response());

    let results = warp::get()
        .and(warp::path("results"))
        .and(warp::path::end())
        .and(warp::query::<ResultsQuery>())
        .and(with_state.clone())
        .map(get_results);

    let seen = warp::get()
        .and(warp::path("seen"))
        .and(warp::path::end())
        .and(with_state.clone())
        .map(get_seen);

    let paper = warp::get()
        .and(warp::path!("papers" / String))
        .and(with_state.clone())
        .map(get_paper);

    let run = warp::post()
        .and(warp::path("run"))
        .and(warp::path::end())
        .and(with_state.clone())
        .map(start_run);

    let logs = warp::get()
        .and(warp::path("logs"))
        .and(warp::path::end())
        .and(with_state)
        .map(|state: AppState| warp::reply::json(&state.logs()).into_response());

    index
        .or(results)
        .unify()
        .or(seen)
        .unify()
        .or(paper)
        .unify()
        .or(run)
        .unify()
        .or(logs)
        .unify()
}

pub async fn start_web_server(config: Config, port: u16) {
    let routes = routes(AppState::new(config));
    println!("Web interface running on http://localhost:{}", port);
    warp::serve(routes).run(([127, 0, 0, 1], port)).await;
}

fn get_results(query: ResultsQuery, state: AppState) -> Response {
    match read_digest(&state.config.storage.digest_file) {
        Ok(entries) => warp::reply::json(&filter_entries(entries, query.q.as_deref())).into_response(),
        Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn get_seen(state: AppState) -> Response {
    let registry = JsonSeenRegistry::load(&state.config.storage.seen_file);
    let entries: Vec<SeenEntry> = registry
        .entries()
        .into_iter()
        .map(|(id, seen_at)| SeenEntry { id, seen_at })
        .collect();
    warp::reply::json(&SeenSummary {
        count: entries.len(),
        entries,
    })
    .into_response()
}

fn get_paper(id: String, state: AppState) -> Response {
    let cache = match DirCache::open(&state.config.storage.cache_dir) {
        Ok(cache) => cache,
        Err(e) => return error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    match cache.get(&id) {
        Some(paper) => warp::reply::json(&paper).into_response(),
        None => error_reply(StatusCode::NOT_FOUND, &format!("paper {} is not cached", id)),
    }
}

fn start_run(state: AppState) -> Response {
    if state.running.swap(true, Ordering::SeqCst) {
        return error_reply(StatusCode::CONFLICT, "A run is already in progress");
    }

    state.add_log("Starting digest run");
    tokio::spawn(async move {
        run_in_background(&state).await;
        state.running.store(false, Ordering::SeqCst);
    });

    warp::reply::json(&StatusMessage::ok("Run started in background")).into_response()
}

async fn run_in_background(state: &AppState) {
    let mut pipeline = match Pipeline::from_config(&state.config, false).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            state.add_log(&format!("Failed to set up run: {:#}", e));
            return;
        }
    };

    let report = pipeline.run(&search_request(&state.config, None)).await;
    state.add_log(&format!("New papers found: {}", report.found));
    if let Some(n) = report.recommended {
        state.add_log(&format!("Recommended: {}", n));
    }
    for failure in &report.failed {
        state.add_log(&format!("Summary failed for {}: {}", failure.id, failure.error));
    }
    state.add_log(&format!(
        "Run completed, {} papers written to the digest",
        report.delivered
    ));
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(warp::reply::json(&StatusMessage::error(message)), status)
        .into_response()
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>arXiv digest</title>
    <style>
        body { font-family: Arial; margin: 20px; background: #f5f5f5; }
        h1 { color: #333; }
        button { padding: 8px 16px; background: rgb(100, 149, 237); color: white; border: none; cursor: pointer; margin-right: 5px; }
        button:hover { background: #5a8dd4; }
        input[type="text"] { padding: 8px; width: 400px; }
        .result { background: white; padding: 15px; margin: 10px 0; border: 1px solid #ddd; }
        .result h3 { margin: 0 0 10px 0; }
        .result a { color: #007bff; text-decoration: none; }
        .info { color: #666; font-size: 14px; }
        .summary { margin-top: 10px; padding: 10px; background: #f9f9f9; border-left: 3px solid #007bff; font-size: 14px; white-space: pre-wrap; }
        .log-container { background: #1e1e1e; color: #d4d4d4; padding: 15px; max-height: 400px; overflow-y: auto; font-family: 'Courier New', monospace; font-size: 13px; }
        #status { margin: 10px 0; }
    </style>
</head>
<body>
    <h1>arXiv digest</h1>
    <div>
        <input type="text" id="q" placeholder="Filter digest...">
        <button onclick="loadResults()">Search</button>
        <button onclick="startRun()">Run now</button>
    </div>
    <div id="status"></div>
    <div id="results"></div>
    <h2>Logs</h2>
    <div class="log-container" id="logs"></div>

    <script>
        function escapeHtml(text) {
            const div = document.createElement('div');
            div.textContent = text;
            return div.innerHTML;
        }

        function loadResults() {
            const q = document.getElementById('q').value;
            fetch('/results?q=' + encodeURIComponent(q))
                .then(r => r.json())
                .then(entries => {
                    const container = document.getElementById('results');
                    if (entries.length === 0) {
                        container.innerHTML = '<p>No papers in the digest yet.</p>';
                        return;
                    }
                    container.innerHTML = entries.map(e => `
                        <div class="result">
                            <h3><a href="${escapeHtml(e.url)}" target="_blank">${escapeHtml(e.title)}</a></h3>
                            <div class="info">${escapeHtml(e.id)} | ${escapeHtml(e.authors)} | ${escapeHtml(e.published)} | <a href="${escapeHtml(e.pdf_url)}" target="_blank">PDF</a></div>
                            <div class="summary">${escapeHtml(e.summary)}</div>
                        </div>`).join('');
                });
        }

        function startRun() {
            fetch('/run', { method: 'POST' })
                .then(r => r.json())
                .then(data => { document.getElementById('status').textContent = data.message; });
        }

        function loadLogs() {
            fetch('/logs')
                .then(r => r.json())
                .then(logs => {
                    const container = document.getElementById('logs');
                    container.innerHTML = logs.map(l => '<div>' + escapeHtml(l) + '</div>').join('');
                    container.scrollTop = container.scrollHeight;
                });
        }

        loadResults();
        loadLogs();
        setInterval(loadLogs, 2000);
    </script>
</body>
</html>
"#;
