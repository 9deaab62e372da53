//! End-to-end tests: a running server probed by the client crate
//!
//! Every server here binds `127.0.0.1:0`, so addresses are read back from the
//! running game rather than configured.

use client::player;
use client::probe::QueryProbe;
use server::config::Config;
use server::event::Event;
use server::game::Game;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const PROBE_WAIT: Duration = Duration::from_secs(1);

/// Config file body for a local, port-0 server.
fn config_json(allocation: &str, query_type: &str) -> Vec<u8> {
    let config = serde_json::json!({
        "AllocatedUUID": allocation,
        "Bind": "127.0.0.1:0",
        "BindQuery": "127.0.0.1:0",
        "QueryType": query_type,
        "MaxPlayers": 6,
        "Map": "harbor",
        "GameType": "koth",
    });
    serde_json::to_vec(&config).unwrap()
}

/// Parsed form of [`config_json`].
fn config(allocation: &str, query_type: &str) -> Config {
    Config::from_slice(&config_json(allocation, query_type)).unwrap()
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

/// Starts an unallocated game from a config file in `dir`.
async fn started_game(dir: &Path) -> Game {
    let path = dir.join("server.json");
    std::fs::write(&path, config_json("", "sqp")).unwrap();

    let mut game = Game::new(&path, 0, 0);
    game.start().await.expect("game did not start");
    game
}

/// Sends `Allocated` and waits until the match is fully up.
async fn allocate(game: &Game, allocation: &str, query_type: &str) -> (SocketAddr, SocketAddr) {
    game.events()
        .send(Event::Allocated(config(allocation, query_type)))
        .await
        .unwrap();

    let expected = format!("hostshim - {}", allocation);
    eventually(|| {
        let named = game
            .state()
            .snapshot()
            .map_or(false, |state| state.server_name == expected);
        named && game.endpoints().game.is_some() && game.endpoints().query.is_some()
    })
    .await;

    let endpoints = game.endpoints();
    (endpoints.query.unwrap(), endpoints.game.unwrap())
}

/// UNALLOCATED SERVER TESTS
mod idle_tests {
    use super::*;

    /// Before allocation SQP answers with zeroed server info.
    #[tokio::test]
    async fn idle_server_answers_with_empty_info() {
        let dir = tempfile::tempdir().unwrap();
        let game = started_game(dir.path()).await;

        let query = game.endpoints().query.expect("query endpoint not up");
        assert!(game.endpoints().game.is_none());

        let probe = QueryProbe::connect(query, PROBE_WAIT).await.unwrap();
        let info = probe.sqp().await.unwrap().server_info.unwrap();
        assert_eq!(info.current_players, 0);
        assert_eq!(info.max_players, 0);
        assert_eq!(info.server_name, "");
        assert_eq!(info.map, "");

        game.stop().await;
    }

    /// A stopped server no longer answers queries.
    #[tokio::test]
    async fn stopped_server_stops_answering() {
        let dir = tempfile::tempdir().unwrap();
        let game = started_game(dir.path()).await;
        let query = game.endpoints().query.unwrap();

        game.stop().await;

        let probe = QueryProbe::connect(query, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(probe.sqp().await.is_err());
    }
}

/// ALLOCATED SERVER TESTS
mod match_tests {
    use super::*;

    /// SQP reports the match, its bound port and its player count.
    #[tokio::test]
    async fn sqp_reports_match_and_players() {
        let dir = tempfile::tempdir().unwrap();
        let game = started_game(dir.path()).await;
        let (query, game_addr) = allocate(&game, "alloc-sqp", "sqp").await;

        let player_task = tokio::spawn(async move {
            player::play(game_addr, "p1", Duration::from_millis(20), None, |_| {}).await
        });
        eventually(|| {
            game.state()
                .snapshot()
                .map_or(false, |state| state.current_players() == 1)
        })
        .await;

        let probe = QueryProbe::connect(query, PROBE_WAIT).await.unwrap();
        let info = probe.sqp().await.unwrap().server_info.unwrap();
        assert_eq!(info.server_name, "hostshim - alloc-sqp");
        assert_eq!(info.current_players, 1);
        assert_eq!(info.max_players, 6);
        assert_eq!(info.map, "harbor");
        assert_eq!(info.game_type, "koth");
        assert_eq!(info.port, game_addr.port());

        // Deallocation hangs up on the player
        game.events().send(Event::Deallocated(None)).await.unwrap();
        let summary = timeout(Duration::from_secs(5), player_task)
            .await
            .expect("player was not disconnected")
            .unwrap()
            .unwrap();
        assert!(summary.check_ins >= 1);

        eventually(|| game.state().snapshot().is_none() && game.endpoints().game.is_none()).await;
        assert!(game.clients().is_empty());

        let info = probe.sqp().await.unwrap().server_info.unwrap();
        assert_eq!(info.current_players, 0);
        assert_eq!(info.server_name, "");

        game.stop().await;
    }

    /// With QueryType a2s the endpoint answers A2S and drops SQP.
    #[tokio::test]
    async fn a2s_reports_match() {
        let dir = tempfile::tempdir().unwrap();
        let game = started_game(dir.path()).await;
        let (query, _) = allocate(&game, "alloc-a2s", "a2s").await;

        let probe = QueryProbe::connect(query, PROBE_WAIT).await.unwrap();
        let reply = probe.a2s().await.unwrap();
        assert_eq!(reply.server_name, "hostshim - alloc-a2s");
        assert_eq!(reply.map, "harbor");
        assert_eq!(reply.players, 0);
        assert_eq!(reply.max_players, 6);

        // SQP is no longer answered on this endpoint
        let probe = QueryProbe::connect(query, Duration::from_millis(300))
            .await
            .unwrap();
        assert!(probe.sqp().await.is_err());

        game.stop().await;
    }

    /// Check-ins sent to the game port are echoed back byte for byte.
    #[tokio::test]
    async fn echo_round_trip_through_game_port() {
        let dir = tempfile::tempdir().unwrap();
        let game = started_game(dir.path()).await;
        let (_, game_addr) = allocate(&game, "alloc-echo", "sqp").await;

        let mut echoed = Vec::new();
        let summary = player::play(game_addr, "echo", Duration::from_millis(10), Some(2), |bytes| {
            echoed.extend_from_slice(bytes)
        })
        .await
        .unwrap();

        assert_eq!(summary.check_ins, 2);
        assert_eq!(
            String::from_utf8(echoed).unwrap(),
            "Player checking in: echo\n".repeat(2)
        );
        eventually(|| game.clients().is_empty()).await;

        game.stop().await;
    }
}
