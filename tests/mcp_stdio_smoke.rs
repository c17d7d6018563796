use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

#[test]
fn mcp_stdio_smoke() {
    let bin = env!("CARGO_BIN_EXE_semsearch");
    let db_dir = tempfile::tempdir().expect("tempdir");
    let db_path = db_dir.path().join("index.lance");

    let mut child = Command::new(bin)
        .arg("mcp")
        .arg("--db")
        .arg(&db_path)
        .arg("--no-embeddings")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn semsearch mcp");

    {
        let stdin = child.stdin.as_mut().expect("child stdin");

        // Keep each JSON-RPC message on one line (server reads by lines()).
        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "smoke-test", "version": "0.0.0" }
                }
            })
        )
        .unwrap();

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/list"
            })
        )
        .unwrap();

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {
                    "name": "get_stats",
                    "arguments": {}
                }
            })
        )
        .unwrap();

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {
                    "name": "health_check",
                    "arguments": {}
                }
            })
        )
        .unwrap();
    }

    // Close stdin so the server loop can exit.
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let reader = BufReader::new(stdout);

    let mut replies_by_id: HashMap<i64, serde_json::Value> = HashMap::new();

    for line in reader.lines() {
        let line = line.expect("read stdout line");
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line).expect("stdout is json");
        let id = v.get("id").and_then(|x| x.as_i64()).expect("json-rpc response id");
        replies_by_id.insert(id, v);
        if replies_by_id.len() >= 4 {
            break;
        }
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "mcp process should exit cleanly");

    // initialize
    {
        let v = replies_by_id.get(&1).expect("initialize reply");
        assert_eq!(v.get("jsonrpc").and_then(|x| x.as_str()), Some("2.0"));
        let result = v.get("result").expect("initialize result");
        assert!(result.get("capabilities").is_some());
        assert!(result.get("serverInfo").is_some());
    }

    // tools/list
    {
        let v = replies_by_id.get(&2).expect("tools/list reply");
        let tools = v
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(|t| t.as_array())
            .expect("tools array");
        let names: std::collections::HashSet<&str> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
            .collect();
        for required in ["search_regex", "search_semantic", "get_stats", "health_check"] {
            assert!(names.contains(required), "missing tool: {required}");
        }
    }

    // get_stats
    {
        let v = replies_by_id.get(&3).expect("get_stats reply");
        let result = v.get("result").expect("tools/call result");
        assert_eq!(result.get("isError").and_then(|x| x.as_bool()), Some(false));
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|x| x.get("text"))
            .and_then(|x| x.as_str())
            .expect("get_stats text");
        let stats: serde_json::Value = serde_json::from_str(text).expect("get_stats text is json");
        assert!(stats.get("files").is_some());
        assert!(stats.get("chunks").is_some());
    }

    // health_check
    {
        let v = replies_by_id.get(&4).expect("health_check reply");
        let result = v.get("result").expect("tools/call result");
        assert_eq!(result.get("isError").and_then(|x| x.as_bool()), Some(false));
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|x| x.get("text"))
            .and_then(|x| x.as_str())
            .expect("health_check text");
        let health: serde_json::Value = serde_json::from_str(text).expect("health_check text is json");
        assert_eq!(health.get("database_connected").and_then(|x| x.as_bool()), Some(true));
    }
}

#[test]
fn initialize_rejects_missing_required_fields() {
    let bin = env!("CARGO_BIN_EXE_semsearch");
    let db_dir = tempfile::tempdir().expect("tempdir");
    let db_path = db_dir.path().join("index.lance");

    let mut child = Command::new(bin)
        .arg("mcp")
        .arg("--db")
        .arg(&db_path)
        .arg("--no-embeddings")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn semsearch mcp");

    {
        let stdin = child.stdin.as_mut().expect("child stdin");
        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-05" }
            })
        )
        .unwrap();
    }
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    reader.read_line(&mut line).expect("read stdout line");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("stdout is json");

    let error = v.get("error").expect("missing-field initialize should error");
    assert_eq!(error.get("code").and_then(|x| x.as_i64()), Some(-32602));
    assert!(error.get("data").and_then(|d| d.get("example")).is_some());

    let _ = child.kill();
    let _ = child.wait();
}
