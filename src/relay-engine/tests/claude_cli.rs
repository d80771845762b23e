//! Drives the CLI runtime against a shell script that speaks stream-json.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use relay_engine::{ClaudeCliRuntime, ClaudeCliSettings, QueryOptions, SessionBridge};
use relay_protocol::ServerMessage;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const FAKE_CLI: &str = r#"
echo '{"type":"system","subtype":"init","session_id":"cli-session","tools":["Bash"]}'
while IFS= read -r line; do
  case "$line" in
    *control_request*)
      id=$(printf '%s' "$line" | sed 's/.*"request_id":"\([^"]*\)".*/\1/')
      printf '{"type":"control_response","response":{"subtype":"success","request_id":"%s"}}\n' "$id"
      ;;
    *crash*)
      echo 'fatal: simulated crash' >&2
      exit 3
      ;;
    *)
      echo '{"type":"stream_event","event":{"type":"message_start","message":{}}}'
      echo '{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"pong"}}}'
      echo '{"type":"assistant","message":{"content":[{"type":"text","text":"pong"}]}}'
      echo '{"type":"result","subtype":"success","result":"pong","total_cost_usd":0.5}'
      ;;
  esac
done
"#;

fn runtime(dir: &TempDir) -> ClaudeCliRuntime {
    let script = dir.path().join("fake-claude.sh");
    std::fs::write(&script, FAKE_CLI).unwrap();
    ClaudeCliRuntime::new(ClaudeCliSettings {
        program: "sh".to_string(),
        launcher_args: vec![script.display().to_string()],
        ..Default::default()
    })
}

async fn next(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("outbound channel closed")
}

fn bridge(dir: &TempDir) -> (Arc<SessionBridge>, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let options = QueryOptions {
        cwd: dir.path().to_path_buf(),
        ..Default::default()
    };
    let bridge = Arc::new(SessionBridge::new(Arc::new(runtime(dir)), options, tx));
    tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.start().await }
    });
    (bridge, rx)
}

#[tokio::test]
async fn test_prompt_round_trip() {
    let dir = TempDir::new().unwrap();
    let (bridge, mut rx) = bridge(&dir);

    bridge.push_prompt("ping");

    assert_eq!(
        next(&mut rx).await,
        ServerMessage::SystemInit {
            session_id: "cli-session".to_string(),
            tools: vec!["Bash".to_string()],
        }
    );
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::TextDelta {
            text: "pong".to_string()
        }
    );
    assert!(matches!(
        next(&mut rx).await,
        ServerMessage::AssistantMessage { .. }
    ));
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::Result {
            text: "pong".to_string(),
            cost: 0.5
        }
    );

    bridge.interrupt().await.unwrap();
    bridge.close();
}

#[tokio::test]
async fn test_nonzero_exit_reported_with_stderr() {
    let dir = TempDir::new().unwrap();
    let (bridge, mut rx) = bridge(&dir);

    bridge.push_prompt("crash");

    assert!(matches!(
        next(&mut rx).await,
        ServerMessage::SystemInit { .. }
    ));
    let ServerMessage::Error { message } = next(&mut rx).await else {
        panic!("expected error");
    };
    assert!(message.contains("exit status: 3"), "{message}");
    assert!(message.contains("simulated crash"), "{message}");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(bridge.is_closed());
}
