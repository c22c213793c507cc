use std::time::Duration;

use common::protocol::{
    self, ConfigRequest, DataRequest, DeviceQuery, LedCommand, RotateCommand, SoundCommand,
    StopCommand,
};
use common::{Command, StopAction};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Address the brick reports when discovery finds no unique device.
const NOT_CONNECTED: &str = "dev_not_connected";

const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to a simulated brick.
pub struct BrickClient {
    stream: TcpStream,
    frame_len: usize,
    reply_timeout: Duration,
}

impl BrickClient {
    pub async fn connect(addr: impl ToSocketAddrs, frame_len: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            frame_len,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sends a command without waiting for anything back.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let payload = protocol::encode_command(command)?;
        let frame = protocol::frame(&payload, self.frame_len)?;
        self.stream.write_all(&frame).await?;
        debug!(kind = command.kind(), "command sent");
        Ok(())
    }

    /// Sends a command and waits for its `{"value": ...}` reply.
    pub async fn request(&mut self, command: &Command) -> Result<Value> {
        self.send(command).await?;

        let mut frame = vec![0; self.frame_len];
        tokio::time::timeout(self.reply_timeout, self.stream.read_exact(&mut frame))
            .await
            .map_err(|_| ClientError::Timeout(self.reply_timeout))??;
        Ok(protocol::decode_response(&frame)?.value)
    }

    /// Starts a run; returns the seconds until the motor is at rest.
    pub async fn rotate(
        &mut self,
        address: &str,
        speed: f64,
        distance: f64,
        stop_action: StopAction,
    ) -> Result<f64> {
        let command = Command::RotateCommand(RotateCommand {
            address: address.to_string(),
            speed,
            distance,
            stop_action,
        });
        let value = self.request(&command).await?;
        expect_f64(value, "RotateCommand")
    }

    pub async fn stop(&mut self, address: &str, speed: f64, stop_action: StopAction) -> Result<f64> {
        let command = Command::StopCommand(StopCommand {
            address: address.to_string(),
            speed,
            stop_action,
        });
        let value = self.request(&command).await?;
        expect_f64(value, "StopCommand")
    }

    pub async fn play_sound(&mut self, message: &str, duration: f64, sound_type: &str) -> Result<()> {
        let command = Command::SoundCommand(SoundCommand {
            message: message.to_string(),
            duration,
            sound_type: sound_type.to_string(),
        });
        self.send(&command).await
    }

    pub async fn set_led(&mut self, address: &str, brightness: f64) -> Result<()> {
        let command = Command::LedCommand(LedCommand {
            address: address.to_string(),
            brightness,
        });
        self.send(&command).await
    }

    /// Reads a sensor. Waits for at least one simulator tick.
    pub async fn read(&mut self, address: &str) -> Result<Value> {
        let command = Command::DataRequest(DataRequest {
            address: address.to_string(),
        });
        match self.request(&command).await? {
            Value::Null => Err(ClientError::Rejected("DataRequest")),
            value => Ok(value),
        }
    }

    /// Looks up the address of a device on this brick.
    pub async fn resolve(&mut self, class_name: &str, query: DeviceQuery) -> Result<String> {
        let command = Command::ConfigRequest(ConfigRequest {
            kwargs: query,
            class_name: class_name.to_string(),
        });
        match self.request(&command).await? {
            Value::String(address) if address == NOT_CONNECTED => {
                Err(ClientError::DeviceNotConnected {
                    class_name: class_name.to_string(),
                })
            }
            Value::String(address) => Ok(address),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn expect_f64(value: Value, kind: &'static str) -> Result<f64> {
    match value {
        Value::Null => Err(ClientError::Rejected(kind)),
        other => other.as_f64().ok_or(ClientError::UnexpectedReply(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const FRAME: usize = 64;

    /// Accepts one client, answers each frame with the next canned reply.
    async fn fake_brick(replies: Vec<&'static str>) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<Command>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut replies = replies.into_iter();
            let mut frame = vec![0; FRAME];
            while socket.read_exact(&mut frame).await.is_ok() {
                let command = protocol::decode(&frame).unwrap();
                if command.expects_reply() {
                    let reply = replies.next().unwrap();
                    let framed = protocol::frame(reply.as_bytes(), FRAME).unwrap();
                    socket.write_all(&framed).await.unwrap();
                }
                received.push(command);
            }
            received
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn rotate_returns_run_time() {
        let (addr, server) = fake_brick(vec![r#"{"value": 2.5}"#]).await;
        let mut client = BrickClient::connect(addr, FRAME).await.unwrap();
        let run_time = client
            .rotate("outA", 90.0, 180.0, StopAction::Coast)
            .await
            .unwrap();
        assert_eq!(run_time, 2.5);
        client.close().await.unwrap();

        let received = server.await.unwrap();
        assert!(matches!(&received[0], Command::RotateCommand(c) if c.address == "outA"));
    }

    #[tokio::test]
    async fn fire_and_forget_commands_need_no_reply() {
        let (addr, server) = fake_brick(vec![r#"{"value": 1}"#]).await;
        let mut client = BrickClient::connect(addr, FRAME).await.unwrap();
        client.play_sound("hi", 0.5, "speak").await.unwrap();
        client.set_led("led0:red:brick-status", 1.0).await.unwrap();
        assert_eq!(client.read("in1").await.unwrap(), Value::from(1));
        client.close().await.unwrap();

        let kinds: Vec<_> = server.await.unwrap().iter().map(Command::kind).collect();
        assert_eq!(kinds, ["SoundCommand", "LedCommand", "DataRequest"]);
    }

    #[tokio::test]
    async fn null_and_not_connected_replies_become_errors() {
        let (addr, _server) = fake_brick(vec![
            r#"{"value": null}"#,
            r#"{"value": "dev_not_connected"}"#,
            r#"{"value": "ev3-ports:outB"}"#,
        ])
        .await;
        let mut client = BrickClient::connect(addr, FRAME).await.unwrap();

        assert!(matches!(client.read("in1").await, Err(ClientError::Rejected(_))));
        assert!(matches!(
            client.resolve("tacho-motor", DeviceQuery::default()).await,
            Err(ClientError::DeviceNotConnected { .. })
        ));
        assert_eq!(
            client.resolve("tacho-motor", DeviceQuery::default()).await.unwrap(),
            "ev3-ports:outB"
        );
    }

    #[tokio::test]
    async fn silent_brick_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let mut client = BrickClient::connect(addr, FRAME)
            .await
            .unwrap()
            .with_reply_timeout(Duration::from_millis(50));
        let err = client.read("in1").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
    }

    #[tokio::test]
    async fn oversized_command_is_refused_locally() {
        let (addr, _server) = fake_brick(vec![]).await;
        let mut client = BrickClient::connect(addr, FRAME).await.unwrap();
        let err = client.play_sound(&"x".repeat(200), 1.0, "speak").await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
