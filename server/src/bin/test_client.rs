use realm_shared::{CharacterClass, ClientCommand, ClientPacket, ServerMessage, Vec3};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

async fn send(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    packet: &ClientPacket,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = serde_json::to_vec(packet)?;
    socket.send_to(&data, server_addr).await?;
    Ok(())
}

/// Prints everything that arrives within `window`. Returns the id of the
/// first living monster seen in a world snapshot.
async fn drain(socket: &UdpSocket, window: Duration) -> Option<u32> {
    let mut buf = vec![0u8; 65536];
    let mut monster = None;

    while let Ok(Ok((len, _))) = timeout(window, socket.recv_from(&mut buf)).await {
        match serde_json::from_slice::<ServerMessage>(&buf[..len]) {
            Ok(ServerMessage::WorldState {
                timestamp,
                players,
                monsters,
            }) => {
                println!(
                    "worldState t={} players={} monsters={}",
                    timestamp,
                    players.len(),
                    monsters.len()
                );
                if monster.is_none() {
                    monster = monsters.iter().find(|m| !m.is_dead).map(|m| m.id);
                }
            }
            Ok(other) => println!("{:?}", other),
            Err(e) => println!("Failed to decode message: {}", e),
        }
    }
    monster
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = "127.0.0.1:8080".parse::<SocketAddr>()?;

    println!("Connecting to {}", server_addr);
    send(
        &socket,
        server_addr,
        &ClientPacket::Connect {
            name: "probe".to_string(),
            class: CharacterClass::Mage,
        },
    )
    .await?;

    let target = drain(&socket, Duration::from_millis(500)).await;

    send(
        &socket,
        server_addr,
        &ClientPacket::Command {
            command: ClientCommand::MoveTo {
                target: Vec3::new(5.0, 0.0, 5.0),
            },
        },
    )
    .await?;

    if let Some(target_id) = target {
        println!("Attacking monster {}", target_id);
        send(
            &socket,
            server_addr,
            &ClientPacket::Command {
                command: ClientCommand::Attack { target_id },
            },
        )
        .await?;
        send(
            &socket,
            server_addr,
            &ClientPacket::Command {
                command: ClientCommand::UseSkill {
                    skill_id: 2,
                    target_id: Some(target_id),
                    target_position: None,
                },
            },
        )
        .await?;
    }

    for _ in 0..5 {
        send(&socket, server_addr, &ClientPacket::Heartbeat).await?;
        drain(&socket, Duration::from_millis(200)).await;
        sleep(Duration::from_millis(800)).await;
    }

    println!("Sending disconnect");
    send(&socket, server_addr, &ClientPacket::Disconnect).await?;
    println!("Test client finished");

    Ok(())
}
