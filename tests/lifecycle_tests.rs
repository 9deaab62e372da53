//! Lifecycle tests driven through the config file and the event queue

use server::config::Config;
use server::event::Event;
use server::game::{Game, GameError, Transition};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

/// Config file body for a local, port-0 server.
fn config_json(allocation: &str) -> Vec<u8> {
    let config = serde_json::json!({
        "AllocatedUUID": allocation,
        "Bind": "127.0.0.1:0",
        "BindQuery": ["127.0.0.1:0"],
    });
    serde_json::to_vec(&config).unwrap()
}

/// Polls `check` until it holds, failing after five seconds.
async fn eventually<F: Fn() -> bool>(check: F) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Name the game currently reports, if allocated.
fn server_name(game: &Game) -> Option<String> {
    game.state().snapshot().map(|state| state.server_name.clone())
}

/// FILE DRIVEN TRANSITIONS
mod watcher_tests {
    use super::*;

    /// Rewriting the config file allocates a match and then releases it.
    #[tokio::test]
    async fn rewriting_config_allocates_and_deallocates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, config_json("")).unwrap();

        let mut game = Game::new(&path, 0, 0);
        game.start().await.unwrap();
        assert!(!game.state().is_allocated());

        std::fs::write(&path, config_json("from-file")).unwrap();
        eventually(|| {
            server_name(&game).as_deref() == Some("hostshim - from-file")
                && game.endpoints().game.is_some()
        })
        .await;

        let game_addr = game.endpoints().game.unwrap();
        let _player = TcpStream::connect(game_addr).await.unwrap();
        eventually(|| game.clients().len() == 1).await;

        // The platform truncates before writing the deallocated config
        std::fs::write(&path, b"").unwrap();
        std::fs::write(&path, config_json("")).unwrap();
        eventually(|| {
            !game.state().is_allocated()
                && game.endpoints().game.is_none()
                && game.endpoints().query.is_some()
        })
        .await;
        eventually(|| game.clients().is_empty()).await;

        game.stop().await;
    }

    /// An unparseable config changes nothing; the next valid one applies.
    #[tokio::test]
    async fn malformed_config_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, config_json("")).unwrap();

        let mut game = Game::new(&path, 0, 0);
        game.start().await.unwrap();
        let query = game.endpoints().query;

        std::fs::write(&path, b"not json").unwrap();
        sleep(Duration::from_millis(200)).await;
        assert!(!game.state().is_allocated());
        assert_eq!(game.endpoints().query, query);

        std::fs::write(&path, config_json("after-bad")).unwrap();
        eventually(|| server_name(&game).as_deref() == Some("hostshim - after-bad")).await;

        game.stop().await;
    }
}

/// EVENT QUEUE ORDERING
mod queue_tests {
    use super::*;

    fn config(allocation: &str) -> Config {
        Config::from_slice(&config_json(allocation)).unwrap()
    }

    /// Every queued event is handled, one transition each, in send order.
    #[tokio::test]
    async fn events_apply_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, config_json("")).unwrap();

        let mut game = Game::new(&path, 0, 0);
        game.start().await.unwrap();
        let mut transitions = game.transitions();

        let events = game.events();
        events.send(Event::Allocated(config("first"))).await.unwrap();
        events.send(Event::Deallocated(None)).await.unwrap();
        events.send(Event::Allocated(config("second"))).await.unwrap();

        let mut trace: Vec<Transition> = Vec::new();
        while trace.len() < 3 {
            let next = timeout(Duration::from_secs(5), transitions.recv())
                .await
                .expect("transition not reported in time")
                .unwrap();
            trace.push(next);
        }

        let steps: Vec<(&str, &str, bool)> = trace
            .iter()
            .map(|t| (t.event, t.allocation.as_str(), t.endpoints.game.is_some()))
            .collect();
        assert_eq!(
            steps,
            vec![
                ("allocated", "first", true),
                ("deallocated", "first", false),
                ("allocated", "second", true),
            ]
        );
        assert!(trace.iter().all(|t| t.endpoints.query.is_some()));
        assert_eq!(trace[2].endpoints, game.endpoints());
        assert_eq!(server_name(&game).as_deref(), Some("hostshim - second"));

        game.stop().await;
    }

    /// A second allocation hangs up on the first match before serving the new one.
    #[tokio::test]
    async fn reallocation_replaces_running_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, config_json("")).unwrap();

        let mut game = Game::new(&path, 0, 0);
        game.start().await.unwrap();

        game.events()
            .send(Event::Allocated(config("one")))
            .await
            .unwrap();
        eventually(|| {
            server_name(&game).as_deref() == Some("hostshim - one") && game.endpoints().game.is_some()
        })
        .await;
        let first_state = game.state().snapshot().unwrap();

        let mut player = TcpStream::connect(game.endpoints().game.unwrap())
            .await
            .unwrap();
        eventually(|| first_state.current_players() == 1).await;

        game.events()
            .send(Event::Allocated(config("two")))
            .await
            .unwrap();
        eventually(|| {
            server_name(&game).as_deref() == Some("hostshim - two") && game.endpoints().game.is_some()
        })
        .await;

        // The first match's player was hung up and counted out
        assert_eq!(first_state.current_players(), 0);
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(2), player.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        game.stop().await;
    }
}

/// STARTUP AND SHUTDOWN
mod startup_tests {
    use super::*;

    /// A taken query port fails startup with the offending address.
    #[tokio::test]
    async fn start_surfaces_query_bind_failure() {
        let blocker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let taken = blocker.local_addr().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        let config = serde_json::json!({ "BindQuery": taken.to_string() });
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();

        let mut game = Game::new(&path, 0, 0);
        let err = assert_err!(game.start().await);
        assert!(matches!(err, GameError::QueryBind { addr, .. } if addr == taken));
        game.stop().await;
    }

    /// Starting an already started game is an error.
    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, config_json("")).unwrap();

        let mut game = Game::new(&path, 0, 0);
        assert_ok!(game.start().await);
        assert!(matches!(game.start().await, Err(GameError::AlreadyStarted)));

        game.stop().await;
    }

    /// Stopping closes the game port, disconnects players and clears state.
    #[tokio::test]
    async fn stop_releases_allocated_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, config_json("")).unwrap();

        let mut game = Game::new(&path, 0, 0);
        game.start().await.unwrap();
        game.events()
            .send(Event::Allocated(config_for("stopping")))
            .await
            .unwrap();
        eventually(|| game.endpoints().game.is_some()).await;

        let endpoints = game.endpoints();
        let state = game.state().clone();
        let clients = game.clients().clone();
        let _player = TcpStream::connect(endpoints.game.unwrap()).await.unwrap();
        eventually(|| clients.len() == 1).await;

        timeout(Duration::from_secs(5), game.stop())
            .await
            .expect("stop did not finish");

        assert!(state.snapshot().is_none());
        assert!(clients.is_empty());
        assert!(TcpStream::connect(endpoints.game.unwrap()).await.is_err());
    }

    fn config_for(allocation: &str) -> Config {
        Config::from_slice(&config_json(allocation)).unwrap()
    }
}
