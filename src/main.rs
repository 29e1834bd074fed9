mod audit;
mod backup;
mod conflict;
mod db;
mod ipc;

use std::io::{self, BufRead, Write};

fn main() {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        // A line that is not a valid request still gets a reply (without
        // an id) so the client fails fast instead of waiting forever.
        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() },
            }),
        };
        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }
}
