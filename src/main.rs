use async_trait::async_trait;
use chrono::Local;
use log::{error, info, warn};
use partyline::calls::media::{LocalMedia, MediaEngine, MediaError, MediaEvent, PeerConnection};
use partyline::{
    ClientConfig, Event, EventHandler, RejectReason, SessionDescription, SignalingClient,
    WebSocketTransportFactory,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// Thin demo client for a signaling relay. Media is stubbed out with
// canned session descriptions; wire a real WebRTC engine in through the
// MediaEngine trait to carry actual audio/video.
//
// Usage:
//   cargo run -- --relay wss://relay.example/ws/call --user alice --token SECRET
//
// Commands on stdin:
//   call <user> | accept | reject | add <user> | end | status | quit

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let relay = parse_arg(&args, "--relay", "-r");
    let user = parse_arg(&args, "--user", "-u");
    let token = parse_arg(&args, "--token", "-t");

    let (Some(relay), Some(user), Some(token)) = (relay, user, token) else {
        eprintln!("usage: partyline --relay <wss-url> --user <name> --token <credential>");
        std::process::exit(2);
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let config = ClientConfig::new(relay.clone(), user, token.clone());
        let transport_factory = Arc::new(WebSocketTransportFactory::new(&relay, &token));
        let media_engine = Arc::new(StubMediaEngine);

        let client = SignalingClient::new(config, transport_factory, media_engine);
        client.add_event_handler(Arc::new(EventPrinter));

        let runner = client.clone();
        let run_task = tokio::spawn(async move { runner.run().await });

        command_loop(&client).await;

        client.disconnect().await;
        let _ = run_task.await;
    });
}

fn parse_arg(args: &[String], long: &str, short: &str) -> Option<String> {
    args.iter()
        .position(|a| a == long || a == short)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn command_loop(client: &Arc<SignalingClient>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!(target: "Demo", "Ready. Commands: call <user> | accept | reject | add <user> | end | status | quit");

    while let Ok(Some(line)) = lines.next_line().await {
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (Some("call"), Some(target)) => client.initiate_call(target).await,
            (Some("accept"), None) => client.accept_call().await,
            (Some("reject"), None) => client.reject_call(RejectReason::Declined).await,
            (Some("add"), Some(target)) => client.add_participant(target).await,
            (Some("end"), None) => client.end_call().await,
            (Some("status"), None) => {
                info!(
                    target: "Demo",
                    "phase={:?} call={:?} participants={:?}",
                    client.call_phase().await,
                    client.current_call_id().await,
                    client.participants().await
                );
                Ok(())
            }
            (Some("quit"), None) => break,
            (None, _) => Ok(()),
            _ => {
                warn!(target: "Demo", "Unrecognized command: {line}");
                Ok(())
            }
        };
        if let Err(e) = result {
            error!(target: "Demo", "{e}");
        }
    }
}

struct EventPrinter;

impl EventHandler for EventPrinter {
    fn handle_event(&self, event: &Event) {
        match event {
            Event::IncomingCall(e) => {
                info!(target: "Demo", "Incoming call {} from {} (accept/reject)", e.call_id, e.from)
            }
            Event::CallRinging(e) => info!(target: "Demo", "Ringing {}...", e.target),
            Event::CallStarted(e) => info!(target: "Demo", "Call {} started", e.call_id),
            Event::CallAnswered(e) => info!(target: "Demo", "{} answered", e.from),
            Event::ParticipantLeft(e) => info!(target: "Demo", "{} left", e.participant),
            Event::CallRejected(e) => {
                info!(target: "Demo", "{} rejected the call: {}", e.participant, e.reason)
            }
            Event::CallEnded(e) => match e.duration_secs {
                Some(secs) => info!(target: "Demo", "Call ended after {secs}s"),
                None => info!(target: "Demo", "Call ended"),
            },
            Event::CallFailure(e) => warn!(target: "Demo", "Call failure: {}", e.message),
            Event::RemoteTrack(e) => info!(target: "Demo", "Media flowing from {}", e.participant),
            Event::Connected => info!(target: "Demo", "Connected to relay"),
            Event::Disconnected => warn!(target: "Demo", "Disconnected from relay"),
        }
    }
}

// ---------- stub media engine ----------

struct StubLocalMedia;

impl LocalMedia for StubLocalMedia {
    fn stop(&self) {
        info!(target: "Media", "Capture stopped");
    }
}

struct StubPeerConnection {
    participant: String,
}

#[async_trait]
impl PeerConnection for StubPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=stub offer for {}\r\n",
            self.participant
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=stub answer for {}\r\n",
            self.participant
        )))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), MediaError> {
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        info!(target: "Media", "Remote {:?} applied for {}", desc.kind, self.participant);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: partyline::IceCandidateInit,
    ) -> Result<(), MediaError> {
        info!(target: "Media", "Candidate for {}: {}", self.participant, candidate.candidate);
        Ok(())
    }

    async fn close(&self) {
        info!(target: "Media", "Connection to {} closed", self.participant);
    }
}

struct StubMediaEngine;

#[async_trait]
impl MediaEngine for StubMediaEngine {
    async fn acquire_local_media(&self) -> Result<Arc<dyn LocalMedia>, MediaError> {
        info!(target: "Media", "Capture started");
        Ok(Arc::new(StubLocalMedia))
    }

    async fn create_peer_connection(
        &self,
        participant: &str,
        _local_media: Arc<dyn LocalMedia>,
        _events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        Ok(Arc::new(StubPeerConnection {
            participant: participant.to_string(),
        }))
    }
}
