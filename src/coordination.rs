//! Signal coordinator (C9): a signal-and-flag handshake letting a
//! short-lived indexer process borrow the database from a long-running
//! server without corrupting the write-ahead log. New module — the
//! teacher has no cross-process protocol; grounded on the `signal-hook`
//! + `libc` combination already in its dependency table (used there only
//! for graceful-shutdown SIGTERM handling), generalized to the full
//! pause/resume rendezvous.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use signal_hook::consts::{SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;

use crate::error::{Result, SearchError};

/// Written into `mcp.pid` alongside the PID and database path so a
/// client can distinguish a live, matching sibling server process from
/// an unrelated process that happens to have inherited a stale PID.
/// Checked against the pid file's own contents rather than the
/// process's `/proc/<pid>/cmdline` — argv is fixed at exec time and the
/// `semsearch` binary has no way to inject an arbitrary marker into its
/// own command line after the fact, so the rendezvous file carries the
/// marker instead.
pub const SERVER_IDENTIFIER_TOKEN: &str = "chunkhound-mcp";

const READY_FLAG_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CLIENT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Rendezvous directory: an 8-hex-digit hash of the absolute database
/// path, prefixed and placed in the OS temp dir, holding `mcp.pid`,
/// `ready.flag`, `done.flag`.
pub fn rendezvous_dir(db_path: &Path) -> PathBuf {
    let canonical = db_path.canonicalize().unwrap_or_else(|_| db_path.to_path_buf());
    let hash = xxhash_rust::xxh3::xxh3_64(canonical.to_string_lossy().as_bytes()) as u32;
    std::env::temp_dir().join(format!("chunkhound-coord-{hash:08x}"))
}

fn pid_file(dir: &Path) -> PathBuf {
    dir.join("mcp.pid")
}
fn ready_flag(dir: &Path) -> PathBuf {
    dir.join("ready.flag")
}
fn done_flag(dir: &Path) -> PathBuf {
    dir.join("done.flag")
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn pid_alive(pid: i32) -> bool {
    // signal 0 performs no action but validates the pid is killable by us.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// `mcp.pid`'s contents: `{pid}\n{SERVER_IDENTIFIER_TOKEN}\n{db_path}`.
fn pid_file_contents(db_path: &Path) -> String {
    format!("{}\n{}\n{}", std::process::id(), SERVER_IDENTIFIER_TOKEN, db_path.display())
}

struct PidFileRecord {
    pid: i32,
    token: String,
    db_path: String,
}

fn parse_pid_file(contents: &str) -> Option<PidFileRecord> {
    let mut lines = contents.lines();
    let pid: i32 = lines.next()?.trim().parse().ok()?;
    let token = lines.next()?.trim().to_string();
    let db_path = lines.next()?.trim().to_string();
    Some(PidFileRecord { pid, token, db_path })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationSignal {
    Pause,
    Resume,
    Terminate,
}

/// Server side: installs a signal handler thread on construction and
/// exposes a non-blocking [`poll`](Self::poll) for the main loop.
pub struct CoordinationServer {
    dir: PathBuf,
    db_path: PathBuf,
    rx: std::sync::mpsc::Receiver<CoordinationSignal>,
    _signals_handle: signal_hook::iterator::Handle,
}

impl CoordinationServer {
    pub fn install(db_path: &Path) -> Result<Self> {
        let dir = rendezvous_dir(db_path);
        fs::create_dir_all(&dir).map_err(|e| SearchError::coordination(format!("cannot create rendezvous dir: {e}")))?;
        fs::write(pid_file(&dir), pid_file_contents(db_path))
            .map_err(|e| SearchError::coordination(format!("cannot write mcp.pid: {e}")))?;

        let mut signals = Signals::new([SIGUSR1, SIGUSR2, SIGTERM])
            .map_err(|e| SearchError::coordination(format!("cannot install signal handlers: {e}")))?;
        let handle = signals.handle();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            for signal in signals.forever() {
                let mapped = match signal {
                    SIGUSR1 => CoordinationSignal::Pause,
                    SIGUSR2 => CoordinationSignal::Resume,
                    SIGTERM => CoordinationSignal::Terminate,
                    _ => continue,
                };
                if tx.send(mapped).is_err() {
                    return;
                }
            }
        });

        Ok(Self { dir, db_path: db_path.to_path_buf(), rx, _signals_handle: handle })
    }

    /// Non-blocking check for a pending signal, for the main loop's poll.
    pub fn poll(&self) -> Option<CoordinationSignal> {
        self.rx.try_recv().ok()
    }

    /// Run the S_PAUSE protocol (spec §4.6): the caller's
    /// `checkpoint_and_disconnect` future must force a checkpoint and
    /// actually drop the database connection before this writes
    /// `ready.flag` — the server must not hold the database while a
    /// sibling is waiting on that flag. Blocks until `done.flag` appears
    /// or the timeout elapses, then returns so the caller can reconnect.
    pub async fn handle_pause<F, Fut>(&self, checkpoint_and_disconnect: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        checkpoint_and_disconnect().await?;
        fs::write(ready_flag(&self.dir), now_secs().to_string())
            .map_err(|e| SearchError::coordination(format!("cannot write ready.flag: {e}")))?;

        let deadline = Instant::now() + READY_FLAG_TIMEOUT;
        while !done_flag(&self.dir).exists() {
            if Instant::now() >= deadline {
                return Err(SearchError::coordination("timed out waiting for done.flag"));
            }
            if matches!(self.poll(), Some(CoordinationSignal::Terminate)) {
                return Err(SearchError::coordination("terminated while paused"));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Run the S_RESUME protocol: reconnect, then clear the flags.
    pub async fn handle_resume<F, Fut>(&self, reconnect: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        reconnect().await?;
        let _ = fs::remove_file(ready_flag(&self.dir));
        let _ = fs::remove_file(done_flag(&self.dir));
        Ok(())
    }

    /// Remove coordination files on any exit path.
    pub fn cleanup(&self) {
        let _ = fs::remove_file(pid_file(&self.dir));
        let _ = fs::remove_file(ready_flag(&self.dir));
        let _ = fs::remove_file(done_flag(&self.dir));
        let _ = fs::remove_dir(&self.dir);
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Client side: a one-shot helper for a short-lived indexer process that
/// needs exclusive database access for the duration of `work`. When no
/// matching server is running, `work` just runs directly.
pub async fn with_paused_server<T, F, Fut>(db_path: &Path, work: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let dir = rendezvous_dir(db_path);
    match live_server_pid(&dir, db_path) {
        None => work().await,
        Some(pid) => {
            unsafe {
                libc::kill(pid, SIGUSR1);
            }
            wait_for(&ready_flag(&dir), DEFAULT_CLIENT_READY_TIMEOUT)
                .await
                .map_err(|_| SearchError::coordination("timed out waiting for ready.flag"))?;

            let result = work().await;

            fs::write(done_flag(&dir), now_secs().to_string())
                .map_err(|e| SearchError::coordination(format!("cannot write done.flag: {e}")))?;
            unsafe {
                libc::kill(pid, SIGUSR2);
            }
            let _ = wait_for_absence(&ready_flag(&dir), DEFAULT_CLIENT_READY_TIMEOUT).await;
            let _ = wait_for_absence(&done_flag(&dir), DEFAULT_CLIENT_READY_TIMEOUT).await;
            let _ = fs::remove_file(ready_flag(&dir));
            let _ = fs::remove_file(done_flag(&dir));
            result
        }
    }
}

async fn wait_for(path: &Path, timeout: Duration) -> std::result::Result<(), ()> {
    let deadline = Instant::now() + timeout;
    while !path.exists() {
        if Instant::now() >= deadline {
            return Err(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

async fn wait_for_absence(path: &Path, timeout: Duration) -> std::result::Result<(), ()> {
    let deadline = Instant::now() + timeout;
    while path.exists() {
        if Instant::now() >= deadline {
            return Err(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

/// Reads `mcp.pid`, validating it names a live process whose recorded
/// marker carries [`SERVER_IDENTIFIER_TOKEN`] and the same database
/// path. Any failure deletes the file and is treated as "no server
/// running" — the only situation in which the client mutates server
/// state.
fn live_server_pid(dir: &Path, db_path: &Path) -> Option<i32> {
    let path = pid_file(dir);
    let contents = fs::read_to_string(&path).ok()?;
    let record = parse_pid_file(&contents)?;

    let is_match = pid_alive(record.pid) && record.token == SERVER_IDENTIFIER_TOKEN && record.db_path == db_path.to_string_lossy();

    if is_match {
        Some(record.pid)
    } else {
        let _ = fs::remove_file(&path);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendezvous_dir_is_deterministic_for_same_path() {
        let p = PathBuf::from("/tmp/some.lance");
        assert_eq!(rendezvous_dir(&p), rendezvous_dir(&p));
    }

    #[test]
    fn rendezvous_dir_differs_for_different_paths() {
        let a = rendezvous_dir(&PathBuf::from("/tmp/a.lance"));
        let b = rendezvous_dir(&PathBuf::from("/tmp/b.lance"));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_pid_file_means_no_server_running() {
        let dir = tempfile::tempdir().unwrap();
        assert!(live_server_pid(dir.path(), Path::new("/tmp/db.lance")).is_none());
    }

    #[test]
    fn unreadable_pid_content_is_treated_as_absent_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(pid_file(dir.path())).unwrap();
        writeln!(f, "not-a-pid").unwrap();
        assert!(live_server_pid(dir.path(), Path::new("/tmp/db.lance")).is_none());
        assert!(!pid_file(dir.path()).exists());
    }

    #[tokio::test]
    async fn with_paused_server_runs_work_directly_when_no_server_present() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.lance");
        let ran = std::cell::Cell::new(false);
        with_paused_server(&db_path, || async {
            ran.set(true);
            Ok(42)
        })
        .await
        .unwrap();
        assert!(ran.get());
    }

    #[test]
    fn pid_file_round_trips_through_parse_pid_file() {
        let db_path = PathBuf::from("/tmp/some.lance");
        let contents = pid_file_contents(&db_path);
        let record = parse_pid_file(&contents).unwrap();
        assert_eq!(record.pid, std::process::id() as i32);
        assert_eq!(record.token, SERVER_IDENTIFIER_TOKEN);
        assert_eq!(record.db_path, db_path.to_string_lossy());
    }

    #[test]
    fn live_server_pid_matches_self_when_token_and_path_line_up() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = PathBuf::from("/tmp/matching.lance");
        fs::write(pid_file(dir.path()), pid_file_contents(&db_path)).unwrap();
        assert_eq!(live_server_pid(dir.path(), &db_path), Some(std::process::id() as i32));
    }

    #[test]
    fn live_server_pid_rejects_mismatched_db_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(pid_file(dir.path()), pid_file_contents(&PathBuf::from("/tmp/a.lance"))).unwrap();
        assert!(live_server_pid(dir.path(), &PathBuf::from("/tmp/b.lance")).is_none());
    }
}
