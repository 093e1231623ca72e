//! End-to-end tests: a real HTTP server on an ephemeral port driving a mock
//! robot controller over TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quadbridge_link::{LinkConfig, RobotLink};
use quadbridge_server::{AppContext, BridgeServer};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

const JPEG: &[u8] = &[0xFF, 0xD8, 0x01, 0x02, 0x03, 0xFF, 0xD9];

/// Accepts control sessions, records every received line, and answers
/// telemetry requests the way the controller does.
async fn run_mock_robot(listener: TcpListener, seen: mpsc::UnboundedSender<String>) {
    while let Ok((stream, _)) = listener.accept().await {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match line.as_str() {
                "CMD_SONIC" => Some("CMD_SONIC#37\n"),
                "CMD_POWER" => Some("CMD_POWER#8.40#5.10\n"),
                _ => None,
            };
            if let Some(reply) = reply {
                let _ = write.write_all(reply.as_bytes()).await;
            }
            let _ = seen.send(line);
        }
    }
}

/// Streams the same length-prefixed JPEG to every video client.
async fn run_mock_camera(listener: TcpListener) {
    while let Ok((mut stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            let mut frame = (JPEG.len() as u32).to_le_bytes().to_vec();
            frame.extend_from_slice(JPEG);
            while stream.write_all(&frame).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
    }
}

struct Harness {
    base: String,
    client: reqwest::Client,
    seen: mpsc::UnboundedReceiver<String>,
    _stop: oneshot::Sender<()>,
}

impl Harness {
    async fn start(with_camera: bool) -> Self {
        let robot = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let command_port = robot.local_addr().unwrap().port();
        let (seen_tx, seen) = mpsc::unbounded_channel();
        tokio::spawn(run_mock_robot(robot, seen_tx));

        // Port 1 refuses; the video task logs and exits.
        let video_port = if with_camera {
            let camera = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = camera.local_addr().unwrap().port();
            tokio::spawn(run_mock_camera(camera));
            port
        } else {
            1
        };

        let link = Arc::new(RobotLink::new(LinkConfig {
            command_port,
            video_port,
            connect_timeout: Duration::from_millis(500),
            video_poll_interval: Duration::from_millis(10),
            ..LinkConfig::default()
        }));
        let context =
            Arc::new(AppContext::new(link).with_grace_period(Duration::from_secs(1)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            BridgeServer::new(context)
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            seen,
            _stop: stop,
        }
    }

    async fn post(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn next_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.seen.recv())
            .await
            .expect("robot received no frame")
            .expect("mock robot stopped")
    }
}

#[tokio::test]
async fn speed_defaults_to_8() {
    let h = Harness::start(false).await;
    let (status, body) = h.get("/speed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speed"], 8);
}

#[tokio::test]
async fn move_carries_the_current_speed() {
    let mut h = Harness::start(false).await;
    let (status, body) = h.post("/connect").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Connected");

    let (status, body) = h.post("/speed/6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speed"], 6);

    let (status, body) = h.post("/move/2/10/0/15").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Moving [2][10][0][15]");
    assert_eq!(body["gait"], 2);
    assert_eq!(body["x"], 10);
    assert_eq!(body["y"], 0);
    assert_eq!(body["speed"], 6);
    assert_eq!(body["angle"], 15);
    assert_eq!(h.next_frame().await, "CMD_MOVE#2#10#0#6#15");

    let (_, body) = h.post("/stop").await;
    assert_eq!(body["status"], "Stopped");
    assert_eq!(h.next_frame().await, "CMD_MOVE#1#0#0#6#0");

    h.post("/disconnect").await;
}

#[tokio::test]
async fn defaults_fill_in_omitted_arguments() {
    let mut h = Harness::start(false).await;
    h.post("/connect").await;

    let cases = [
        ("/head/vertical", "CMD_HEAD#0#90"),
        ("/head/horizontal/120", "CMD_HEAD#1#120"),
        ("/buzzer", "CMD_BUZZER#0"),
        ("/balance/1", "CMD_BALANCE#1"),
        ("/position", "CMD_POSITION#0#0#0"),
        ("/attitude/-5/0/20", "CMD_ATTITUDE#-5#0#20"),
        ("/led/mode/3", "CMD_LED_MOD#3"),
        ("/led/color", "CMD_LED#255#255#255#255"),
        ("/relax", "CMD_SERVOPOWER#0"),
        ("/servopower/on", "CMD_SERVOPOWER#1"),
    ];
    for (path, frame) in cases {
        let (status, _) = h.post(path).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(h.next_frame().await, frame, "{path}");
    }

    h.post("/disconnect").await;
}

#[tokio::test]
async fn sonic_and_power_return_fresh_readings() {
    let h = Harness::start(false).await;
    h.post("/connect").await;

    let (status, body) = h.get("/sonic").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distance"], "37cm");
    assert_eq!(body["fresh"], true);

    let (status, body) = h.get("/power").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["power_servo"], "8.40V");
    assert_eq!(body["power_rasp"], "5.10V");
    assert_eq!(body["fresh"], true);

    let (_, state) = h.get("/state").await;
    assert_eq!(state["connected"], true);
    assert_eq!(state["distance"], "37cm");
    assert_eq!(state["distance_seq"], 1);

    h.post("/disconnect").await;
}

#[tokio::test]
async fn commands_without_a_session_are_conflicts() {
    let h = Harness::start(false).await;
    for path in ["/move", "/buzzer/1", "/led/color/1/2/3"] {
        let (status, body) = h.post(path).await;
        assert_eq!(status, StatusCode::CONFLICT, "{path}");
        assert_eq!(body["error"]["code"], 409);
        assert_eq!(body["error"]["name"], "Conflict");
    }
    let (status, _) = h.get("/sonic").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn bad_arguments_are_rejected_before_sending() {
    let h = Harness::start(false).await;

    let cases = [
        ("/speed/abc", "'speed'"),
        ("/speed/11", "'speed'"),
        ("/move/3/0/0/0", "'gait'"),
        ("/move/1/ten/0/0", "'x'"),
        ("/head/vertical/181", "'angle'"),
        ("/attitude/0/21/0", "'pitch'"),
        ("/led/color/0/256/0", "'g'"),
        ("/position/1/2", "'z'"),
        ("/speed/%FF", "'speed'"),
        ("/led/color/0/%C3%28/0", "'g'"),
    ];
    for (path, param) in cases {
        let (status, body) = h.post(path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(body["error"]["code"], 400);
        let description = body["error"]["description"].as_str().unwrap();
        assert!(description.contains(param), "{path}: {description}");
    }

    // Rejected speeds leave the stored value alone.
    let (_, body) = h.get("/speed").await;
    assert_eq!(body["speed"], 8);
}

#[tokio::test]
async fn unknown_routes_and_methods_answer_in_json() {
    let h = Harness::start(false).await;

    let (status, body) = h.get("/teleport").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 404);

    let (status, body) = h.get("/connect").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"]["code"], 405);
}

#[tokio::test]
async fn session_lifecycle() {
    let h = Harness::start(false).await;

    let (_, body) = h.post("/disconnect").await;
    assert_eq!(body["status"], "Not connected");

    let (status, _) = h.post("/connect").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = h.post("/connect").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"]["description"].as_str().unwrap().contains("Already connected"));

    let (_, body) = h.post("/disconnect").await;
    assert_eq!(body["status"], "Disconnected");
    let (_, state) = h.get("/state").await;
    assert_eq!(state["connected"], false);

    // A fresh session can be opened afterwards.
    let (status, _) = h.post("/connect").await;
    assert_eq!(status, StatusCode::OK);
    h.post("/disconnect").await;
}

#[tokio::test]
async fn connect_failure_is_a_bad_gateway() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let link = Arc::new(RobotLink::new(LinkConfig {
        command_port: dead_port,
        video_port: 1,
        connect_timeout: Duration::from_millis(500),
        ..LinkConfig::default()
    }));
    let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = server_listener.local_addr().unwrap();
    tokio::spawn(
        BridgeServer::new(Arc::new(AppContext::new(link)))
            .serve(server_listener, std::future::pending::<()>()),
    );

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/connect"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], 502);
}

#[tokio::test]
async fn camera_image_serves_the_latest_captured_jpeg() {
    let h = Harness::start(true).await;

    let (status, body) = h.get("/camera/image").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 404);

    h.post("/connect").await;

    let url = format!("{}/camera/image", h.base);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let response = h.client.get(&url).send().await.unwrap();
        if response.status() == StatusCode::OK {
            assert_eq!(response.headers()["content-type"], "image/jpeg");
            assert_eq!(response.bytes().await.unwrap().as_ref(), JPEG);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no frame captured");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    h.post("/disconnect").await;
}
