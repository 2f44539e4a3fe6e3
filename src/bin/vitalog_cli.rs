//!
//! vitalog CLI binary
//! ------------------
//! Interactive journal client for a vitalog server. Keeps a local state folder
//! (session cookie, mirror, last-user hint) so a restart resumes the signed-in
//! session without a fresh login.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use vitalog::cli::{print_records, print_sync_report, print_user};
use vitalog::client::{
    identity_cell, ApiClient, ApiConfig, DataSynchronizer, PersistentMirror, ReconcilerConfig,
    SessionReconciler, SyncConfig, ViewNavigator,
};
use vitalog::identity::now_ms;
use vitalog::records::EntityKind;
use serde_json::json;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--server <url>] [--state-folder <path>] [--user <handle> --password <p>]\n\nFlags:\n  --server <url>          vitalog server base URL (env: VITALOG_SERVER_URL, default http://127.0.0.1:7878)\n  --state-folder <path>   Local state folder for cookie/mirror files (env: VITALOG_STATE_FOLDER, default state/vitalog)\n  --user <handle>         Sign in on startup (requires --password)\n  --password <p>          Password for --user\n  -h, --help              Show this help\n\nInteractive commands:\n  login <handle> <password>             sign in\n  register <handle> <password> [name]   create an account and sign in\n  logout                                sign out and clear local session state\n  whoami                                show the signed-in user and profile\n  status                                show session phase, failures and local tiers\n  sync [force]                          refresh journal data (force bypasses the cache)\n  list meals|sleep|checkins             sync then print one journal kind\n  add meal <name> [calories] [notes..]  log a meal eaten now\n  add sleep <hours> [quality]           log a sleep interval ending now\n  add checkin <mood 1-5> [note..]       log a mood check-in\n  profile name|timezone|calories|sleepgoal <value>\n                                        update one profile field\n  help                                  show this help\n  quit | exit                           exit\n\nExamples:\n  {program} --server http://127.0.0.1:7878 --user ana@example.com --password hunter22\n    > add meal porridge 350 with honey\n    > list meals"
    );
}

/// Navigator for the terminal: there is no login surface to redirect to, so a
/// forced sign-out just tells the user to log back in.
struct TerminalNavigator;

impl ViewNavigator for TerminalNavigator {
    fn request_login_redirect(&self, reason: &str) {
        eprintln!("session lost ({}); use 'login <handle> <password>' to sign back in", reason);
    }
}

/// Entry point for the vitalog CLI. Parses flags, wires the three session
/// tiers against the configured server, then starts the interactive loop.
fn main() -> Result<()> {
    println!(r"        _ __        __
 _   __(_) /_____ _/ /___  ____ _
| | / / / __/ __ `/ / __ \/ __ `/
| |/ / / /_/ /_/ / / /_/ / /_/ /
|___/_/\__/\__,_/_/\____/\__, /
                        /____/
       Command Line Interface");
    // Initialize tracing subscriber so client-side session logs are visible
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut server: Option<String> = None;
    let mut state_folder: Option<String> = None;
    let mut login_user: Option<String> = None;
    let mut login_password: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--server" => {
                if i + 1 >= args.len() { eprintln!("--server requires a URL"); print_usage(&program); std::process::exit(2); }
                server = Some(args[i+1].clone());
                i += 2; continue;
            }
            "--state-folder" => {
                if i + 1 >= args.len() { eprintln!("--state-folder requires a value"); print_usage(&program); std::process::exit(2); }
                state_folder = Some(args[i+1].clone());
                i += 2; continue;
            }
            "--user" => {
                if i + 1 >= args.len() { eprintln!("--user requires a value"); print_usage(&program); std::process::exit(2); }
                login_user = Some(args[i+1].clone());
                i += 2; continue;
            }
            "--password" => {
                if i + 1 >= args.len() { eprintln!("--password requires a value"); print_usage(&program); std::process::exit(2); }
                login_password = Some(args[i+1].clone());
                i += 2; continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            unk => {
                eprintln!("Unrecognized argument: {}", unk);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let server_url = server
        .or_else(|| env::var("VITALOG_SERVER_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:7878".to_string());
    let state_path = state_folder
        .or_else(|| env::var("VITALOG_STATE_FOLDER").ok())
        .unwrap_or_else(|| "state/vitalog".to_string());

    // Ensure the state folder exists before any tier touches it
    if let Err(e) = fs::create_dir_all(&state_path) {
        eprintln!("Failed to ensure state folder '{}': {}", state_path, e);
    }

    // Tokio runtime
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    // Wire the three tiers: cookie jar + mirror + in-memory identity
    let api = Arc::new(
        ApiClient::new(&ApiConfig::new(&server_url).with_state_folder(&state_path))
            .with_context(|| format!("Failed to build API client for {}", server_url))?,
    );
    let mirror = PersistentMirror::open(&state_path)
        .with_context(|| format!("Failed to open mirror state at {}", state_path))?;
    let (cell, _reader) = identity_cell();
    let reconciler = Arc::new(SessionReconciler::new(
        api.clone(),
        mirror.clone(),
        cell,
        Arc::new(TerminalNavigator),
        ReconcilerConfig::default(),
    ));
    let sync = DataSynchronizer::new(
        api.clone(),
        reconciler.clone(),
        mirror.hint_handle(),
        SyncConfig::default(),
    );
    let reader = reconciler.reader();

    println!("vitalog client\n  server: {}\n  state:  {}", server_url, state_path);

    // Optional startup login; otherwise reconcile whatever session state is on disk
    if let Some(user) = login_user {
        let pass = match login_password {
            Some(p) => p,
            None => { eprintln!("--user requires --password"); std::process::exit(2); }
        };
        match rt.block_on(async { reconciler.login(&user, &pass).await }) {
            Ok(me) => println!("signed in as {}", me.display_name),
            Err(e) => eprintln!("login failed: {}", e),
        }
    } else {
        let ok = rt.block_on(async { reconciler.check_session().await });
        if ok {
            if let Some(me) = reader.current() {
                println!("resumed session for {}", me.display_name);
            }
        } else {
            println!("not signed in (use 'login <handle> <password>')");
        }
    }

    run_repl(rt, api, reconciler, sync)
}

fn run_repl(
    rt: tokio::runtime::Runtime,
    api: Arc<ApiClient>,
    reconciler: Arc<SessionReconciler>,
    sync: Arc<DataSynchronizer>,
) -> Result<()> {
    let reader = reconciler.reader();
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();
    println!("vitalog interpreter. Type 'help' for commands.");
    loop {
        input.clear();
        print!("> "); let _ = stdout.flush();
        if stdin.read_line(&mut input).is_err() { break; }
        let line = input.trim();
        if line.is_empty() { continue; }
        let up = line.to_uppercase();
        if up == "EXIT" || up == "QUIT" { break; }
        if up == "HELP" { print_usage("vitalog_cli"); continue; }
        if up.starts_with("LOGIN ") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 3 { eprintln!("usage: login <handle> <password>"); continue; }
            match rt.block_on(async { reconciler.login(parts[1], parts[2]).await }) {
                Ok(me) => println!("signed in as {}", me.display_name),
                Err(e) => eprintln!("login failed: {}", e),
            }
            continue;
        }
        if up.starts_with("REGISTER ") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 { eprintln!("usage: register <handle> <password> [display name]"); continue; }
            // fall back to the OS account's real name for the display name
            let display = if parts.len() > 3 { parts[3..].join(" ") } else { whoami::realname() };
            match rt.block_on(async { reconciler.register(parts[1], parts[2], &display).await }) {
                Ok(me) => println!("registered and signed in as {}", me.display_name),
                Err(e) => eprintln!("register failed: {}", e),
            }
            continue;
        }
        if up == "LOGOUT" {
            rt.block_on(async { reconciler.logout().await });
            println!("signed out");
            continue;
        }
        if up == "WHOAMI" {
            match reader.current() {
                Some(me) => print_user(&me),
                None => println!("not signed in"),
            }
            continue;
        }
        if up == "STATUS" {
            println!("phase: {}", reconciler.phase());
            println!("consecutive check failures: {}", reconciler.failures());
            if let Some(fault) = reconciler.last_fault() {
                println!("last fault: {}", fault);
            }
            println!("session cookie on disk: {}", api.has_session_cookie());
            println!("user id: {}", reader.user_id_or_guest());
            continue;
        }
        if up == "SYNC" || up == "SYNC FORCE" {
            let uid = reader.user_id_or_guest();
            let force = up.ends_with("FORCE");
            let ok = rt.block_on(async { sync.sync_with_options(&uid, force).await });
            match sync.last_report() {
                Some(report) => {
                    println!("sync {}:", if ok { "ok" } else { "incomplete" });
                    print_sync_report(&report);
                }
                None => println!("sync {}", if ok { "ok" } else { "failed" }),
            }
            continue;
        }
        if up.starts_with("LIST ") {
            let name = line[5..].trim().to_lowercase();
            let Some(kind) = EntityKind::parse(&name) else {
                eprintln!("unknown kind '{}'; expected meals, sleep or checkins", name);
                continue;
            };
            let uid = reader.user_id_or_guest();
            let _ = rt.block_on(async { sync.sync_data(&uid).await });
            match sync.snapshot(&uid, kind) {
                Some(records) if !records.is_empty() => { print_records(kind, &records); }
                _ => println!("no {} recorded yet", kind),
            }
            continue;
        }
        if up.starts_with("ADD ") {
            let Some(me) = reader.current() else {
                eprintln!("add requires a signed-in session");
                continue;
            };
            let rest = line[4..].trim();
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.is_empty() { eprintln!("usage: add meal|sleep|checkin ..."); continue; }
            let outcome = match parts[0].to_lowercase().as_str() {
                "meal" => add_meal(&rt, &api, &me.id, &parts[1..]),
                "sleep" => add_sleep(&rt, &api, &me.id, &parts[1..]),
                "checkin" => add_checkin(&rt, &api, &me.id, &parts[1..]),
                other => { eprintln!("unknown entry kind '{}'", other); continue; }
            };
            match outcome {
                Ok(saved) => {
                    println!("saved: {}", saved);
                    // drop the stale cached copy so the next list shows the new entry
                    let _ = rt.block_on(async { sync.sync_with_options(&me.id, true).await });
                }
                Err(e) => eprintln!("error: {}", e),
            }
            continue;
        }
        if up.starts_with("PROFILE ") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 { eprintln!("usage: profile name|timezone|calories|sleepgoal <value>"); continue; }
            let value = parts[2..].join(" ");
            let patch = match parts[1].to_lowercase().as_str() {
                "name" => json!({"displayName": value}),
                "timezone" => json!({"timezone": value}),
                "calories" => match value.parse::<u32>() {
                    Ok(n) => json!({"dailyCalorieGoal": n}),
                    Err(_) => { eprintln!("calories goal must be a number"); continue; }
                },
                "sleepgoal" => match value.parse::<f32>() {
                    Ok(h) => json!({"sleepGoalHours": h}),
                    Err(_) => { eprintln!("sleep goal must be hours, e.g. 7.5"); continue; }
                },
                other => { eprintln!("unknown profile field '{}'", other); continue; }
            };
            match rt.block_on(async { reconciler.update_profile(patch).await }) {
                Ok(me) => print_user(&me),
                Err(e) => eprintln!("error: {}", e),
            }
            continue;
        }
        eprintln!("unrecognized command: {} (try 'help')", line);
    }
    Ok(())
}

fn add_meal(
    rt: &tokio::runtime::Runtime,
    api: &ApiClient,
    uid: &str,
    args: &[&str],
) -> Result<String> {
    if args.is_empty() {
        anyhow::bail!("usage: add meal <name> [calories] [notes..]");
    }
    let name = args[0];
    let (calories, note_start) = match args.get(1).and_then(|s| s.parse::<u32>().ok()) {
        Some(c) => (Some(c), 2),
        None => (None, 1),
    };
    let notes = if args.len() > note_start { Some(args[note_start..].join(" ")) } else { None };
    let mut payload = json!({"name": name, "eatenAt": now_ms()});
    if let Some(c) = calories {
        payload["calories"] = json!(c);
    }
    if let Some(n) = notes {
        payload["notes"] = json!(n);
    }
    rt.block_on(async { api.save_entity(uid, EntityKind::Meals, payload).await })?;
    Ok(format!("meal '{}'{}", name, calories.map(|c| format!(" ({c} kcal)")).unwrap_or_default()))
}

fn add_sleep(
    rt: &tokio::runtime::Runtime,
    api: &ApiClient,
    uid: &str,
    args: &[&str],
) -> Result<String> {
    let hours: f64 = args
        .first()
        .and_then(|s| s.parse().ok())
        .filter(|h| *h > 0.0 && *h < 24.0)
        .context("usage: add sleep <hours 0-24> [quality 1-5]")?;
    let quality = args.get(1).and_then(|s| s.parse::<u8>().ok());
    let ended_at = now_ms();
    let started_at = ended_at - (hours * 3_600_000.0) as i64;
    let mut payload = json!({"startedAt": started_at, "endedAt": ended_at});
    if let Some(q) = quality {
        payload["quality"] = json!(q);
    }
    rt.block_on(async { api.save_entity(uid, EntityKind::Sleep, payload).await })?;
    Ok(format!("sleep {:.1}h", hours))
}

fn add_checkin(
    rt: &tokio::runtime::Runtime,
    api: &ApiClient,
    uid: &str,
    args: &[&str],
) -> Result<String> {
    let mood: u8 = args
        .first()
        .and_then(|s| s.parse().ok())
        .filter(|m| (1..=5).contains(m))
        .context("usage: add checkin <mood 1-5> [note..]")?;
    let note = if args.len() > 1 { Some(args[1..].join(" ")) } else { None };
    let mut payload = json!({"mood": mood, "loggedAt": now_ms()});
    if let Some(n) = note {
        payload["note"] = json!(n);
    }
    rt.block_on(async { api.save_entity(uid, EntityKind::Checkins, payload).await })?;
    Ok(format!("check-in {}/5", mood))
}
