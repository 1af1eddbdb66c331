//! Protocol-level tests for the match session coordinator.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use ugolki_rules::{Action, Board, Cell, Color, Coord, GameState};
use ugolki_server::{
    ConnectionHandle, Coordinator, CoordinatorConfig, EloRating, Flow, GameId, GameMode,
    GameStatePayload, GameStore, Identity, MemoryStore, NewSession, RandomAgent, ServerMessage,
    SessionStatus, TokenAuth,
};

struct Harness {
    coordinator: Coordinator,
    store: Arc<MemoryStore>,
    auth: TokenAuth,
}

struct Player {
    identity: Identity,
    token: String,
    conn: ConnectionHandle,
    rx: UnboundedReceiver<ServerMessage>,
}

fn harness(agent_delay: Duration) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let auth = TokenAuth::new(b"test-secret", ChronoDuration::hours(1)).expect("valid key");
    let coordinator = Coordinator::new(
        store.clone(),
        Arc::new(EloRating::new(store.clone())),
        Arc::new(auth.clone()),
        Arc::new(RandomAgent::seeded(7)),
        CoordinatorConfig { agent_delay },
    );
    Harness {
        coordinator,
        store,
        auth,
    }
}

fn at(row: usize, col: usize) -> Coord {
    Coord::new(row, col).expect("coordinate on board")
}

async fn next(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Channel closed")
}

fn assert_silent(rx: &mut UnboundedReceiver<ServerMessage>) {
    assert!(rx.try_recv().is_err(), "Unexpected message queued");
}

fn expect_state(message: ServerMessage) -> GameStatePayload {
    match message {
        ServerMessage::GameCreated(state)
        | ServerMessage::GameStarted(state)
        | ServerMessage::GameState(state) => state,
        other => panic!("Expected a state message, got {:?}", other),
    }
}

fn expect_error(message: ServerMessage) -> String {
    match message {
        ServerMessage::Error { message } => message,
        other => panic!("Expected an error, got {:?}", other),
    }
}

impl Harness {
    async fn player(&self, username: &str) -> Player {
        let profile = self
            .store
            .create_user(username)
            .await
            .expect("Create user failed");
        let token = self.auth.issue(*profile.id());
        self.connect(&token).await
    }

    async fn connect(&self, token: &str) -> Player {
        let (conn, mut rx) = ConnectionHandle::channel();
        let identity = self
            .coordinator
            .connect(token, &conn)
            .await
            .expect("Connect failed");
        assert!(matches!(next(&mut rx).await, ServerMessage::Connected { .. }));
        Player {
            identity,
            token: token.to_string(),
            conn,
            rx,
        }
    }

    async fn send(&self, player: &Player, text: &str) -> Flow {
        self.coordinator
            .handle_text(&player.identity, &player.token, &player.conn, text)
            .await
    }

    async fn create(&self, player: &mut Player, game_type: &str) -> GameStatePayload {
        let text = format!(r#"{{"type":"create_game","data":{{"game_type":"{}"}}}}"#, game_type);
        assert_eq!(self.send(player, &text).await, Flow::Continue);
        expect_state(next(&mut player.rx).await)
    }

    async fn join(&self, player: &Player, game_id: GameId) -> Flow {
        let text = format!(r#"{{"type":"join_game","data":{{"game_id":{}}}}}"#, game_id);
        self.send(player, &text).await
    }

    async fn play(&self, player: &Player, game_id: GameId, action: Action) -> Flow {
        let text = serde_json::json!({
            "type": "move",
            "data": {"game_id": game_id, "from": action.from(), "to": action.to()},
        })
        .to_string();
        self.send(player, &text).await
    }

    async fn reconnect(&self, player: &Player, game_id: GameId) -> Flow {
        let text = format!(r#"{{"type":"reconnect","data":{{"game_id":{}}}}}"#, game_id);
        self.send(player, &text).await
    }

    /// Creates an active player-vs-player match between two new participants.
    async fn pvp_match(&self) -> (Player, Player, GameId) {
        let mut white = self.player("white").await;
        let mut black = self.player("black").await;
        let created = self.create(&mut white, "pvp").await;
        assert_eq!(created.status, SessionStatus::Waiting);

        assert_eq!(self.join(&black, created.game_id).await, Flow::Continue);
        let started = expect_state(next(&mut white.rx).await);
        assert_eq!(started.status, SessionStatus::Active);
        assert_eq!(started.black_player_id, Some(*black.identity.user_id()));
        expect_state(next(&mut black.rx).await);

        (white, black, created.game_id)
    }
}

#[tokio::test]
async fn test_create_ai_game_starts_active() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;

    let state = h.create(&mut alice, "ai").await;
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.game_type, GameMode::AgainstAgent);
    assert_eq!(state.turn, Color::White);
    assert_eq!(state.board, Board::initial());
    assert_eq!(state.legal_moves.len(), 16);
    assert_eq!(state.black_player_id, None);
}

#[tokio::test]
async fn test_create_defaults_to_ai() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;

    h.send(&alice, r#"{"type":"create_game"}"#).await;
    let state = expect_state(next(&mut alice.rx).await);
    assert_eq!(state.game_type, GameMode::AgainstAgent);
}

#[tokio::test]
async fn test_agent_replies_to_player_move() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    let created = h.create(&mut alice, "ai").await;

    let action = created.legal_moves[0];
    assert_eq!(h.play(&alice, created.game_id, action).await, Flow::Continue);

    let after_player = expect_state(next(&mut alice.rx).await);
    assert_eq!(after_player.turn, Color::Black);

    let after_agent = expect_state(next(&mut alice.rx).await);
    assert_eq!(after_agent.turn, Color::White);
    assert_eq!(after_agent.status, SessionStatus::Active);
    assert_eq!(after_agent.board.count(Color::White), 16);
    assert_eq!(after_agent.board.count(Color::Black), 16);
    assert_ne!(after_agent.board, after_player.board);

    let stored = h
        .store
        .get_game(created.game_id)
        .await
        .expect("Store read failed")
        .expect("Game stored");
    assert_eq!(stored.state.board(), &after_agent.board);
    assert_eq!(stored.state.turn(), Color::White);
}

#[tokio::test]
async fn test_agent_skips_when_nobody_is_connected() {
    let h = harness(Duration::from_millis(100));
    let mut alice = h.player("alice").await;
    let created = h.create(&mut alice, "ai").await;

    h.play(&alice, created.game_id, created.legal_moves[0]).await;
    expect_state(next(&mut alice.rx).await);
    h.coordinator
        .disconnect(*alice.identity.user_id(), alice.conn.id())
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let session = h
        .coordinator
        .session_snapshot(created.game_id)
        .await
        .expect("Session live");
    assert_eq!(session.state.turn(), Color::Black);

    // Coming back reschedules the overdue reply.
    let mut again = h.connect(&alice.token).await;
    assert_eq!(h.reconnect(&again, created.game_id).await, Flow::Continue);
    let snapshot = expect_state(next(&mut again.rx).await);
    assert_eq!(snapshot.turn, Color::Black);
    let replied = expect_state(next(&mut again.rx).await);
    assert_eq!(replied.turn, Color::White);
}

#[tokio::test]
async fn test_join_active_game_rejected_without_change() {
    let h = harness(Duration::ZERO);
    let (mut white, mut black, game_id) = h.pvp_match().await;
    let mut carol = h.player("carol").await;

    assert_eq!(h.join(&carol, game_id).await, Flow::Continue);
    assert_eq!(
        expect_error(next(&mut carol.rx).await),
        "Game is not available to join"
    );

    let session = h
        .coordinator
        .session_snapshot(game_id)
        .await
        .expect("Session live");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.black_player_id, Some(*black.identity.user_id()));
    assert_silent(&mut white.rx);
    assert_silent(&mut black.rx);
}

#[tokio::test]
async fn test_join_completed_game_rejected_without_change() {
    let h = harness(Duration::ZERO);
    let alice = h.player("alice").await;
    let mut bob = h.player("bob").await;

    let mut finished = h
        .store
        .create_game(NewSession::new(*alice.identity.user_id(), GameMode::PlayerVsPlayer))
        .await
        .expect("Create failed");
    finished.status = SessionStatus::Completed;
    finished.completed_at = Some(Utc::now().naive_utc());
    h.store.save_game(&finished).await.expect("Save failed");

    h.join(&bob, finished.id).await;
    assert_eq!(
        expect_error(next(&mut bob.rx).await),
        "Game is not available to join"
    );
    let stored = h
        .store
        .get_game(finished.id)
        .await
        .expect("Store read failed")
        .expect("Game stored");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.black_player_id, None);
}

#[tokio::test]
async fn test_join_ai_game_rejected() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    let mut bob = h.player("bob").await;
    let created = h.create(&mut alice, "ai").await;

    h.join(&bob, created.game_id).await;
    assert_eq!(
        expect_error(next(&mut bob.rx).await),
        "Game is not available to join"
    );
}

#[tokio::test]
async fn test_cannot_join_own_game() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    let created = h.create(&mut alice, "pvp").await;

    h.join(&alice, created.game_id).await;
    assert_eq!(
        expect_error(next(&mut alice.rx).await),
        "Cannot join your own game"
    );
    let session = h
        .coordinator
        .session_snapshot(created.game_id)
        .await
        .expect("Session live");
    assert_eq!(session.status, SessionStatus::Waiting);
}

#[tokio::test]
async fn test_join_unknown_game() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    h.join(&alice, 999).await;
    assert_eq!(expect_error(next(&mut alice.rx).await), "Game not found");
}

#[tokio::test]
async fn test_off_turn_move_rejected_without_change() {
    let h = harness(Duration::ZERO);
    let (mut white, mut black, game_id) = h.pvp_match().await;

    // Black tries to move on white's turn.
    let black_move = Action::new(at(4, 4), at(3, 4));
    assert_eq!(h.play(&black, game_id, black_move).await, Flow::Continue);
    assert_eq!(expect_error(next(&mut black.rx).await), "Not your turn");

    let session = h
        .coordinator
        .session_snapshot(game_id)
        .await
        .expect("Session live");
    assert_eq!(session.state.board(), &Board::initial());
    assert_eq!(session.state.turn(), Color::White);
    assert_silent(&mut white.rx);
}

#[tokio::test]
async fn test_illegal_move_rejected() {
    let h = harness(Duration::ZERO);
    let (mut white, _black, game_id) = h.pvp_match().await;

    // Diagonal steps are never legal.
    h.play(&white, game_id, Action::new(at(3, 3), at(4, 4))).await;
    assert_eq!(expect_error(next(&mut white.rx).await), "Illegal move");

    h.play(&white, game_id, Action::new(at(3, 3), at(2, 4))).await;
    assert_eq!(expect_error(next(&mut white.rx).await), "Illegal move");
}

#[tokio::test]
async fn test_move_broadcasts_to_both_players() {
    let h = harness(Duration::ZERO);
    let (mut white, mut black, game_id) = h.pvp_match().await;

    let action = Action::new(at(3, 3), at(3, 4));
    h.play(&white, game_id, action).await;

    let seen_by_white = expect_state(next(&mut white.rx).await);
    let seen_by_black = expect_state(next(&mut black.rx).await);
    assert_eq!(seen_by_white, seen_by_black);
    assert_eq!(seen_by_white.turn, Color::Black);
    assert_eq!(seen_by_white.board.get(at(3, 4)), Cell::Occupied(Color::White));
    assert!(
        seen_by_white
            .legal_moves
            .iter()
            .all(|a| seen_by_white.board.get(a.from()) == Cell::Occupied(Color::Black))
    );
}

#[tokio::test]
async fn test_move_error_messages() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    let action = Action::new(at(3, 3), at(3, 4));

    h.play(&alice, 42, action).await;
    assert_eq!(expect_error(next(&mut alice.rx).await), "Game not found");

    let waiting = h.create(&mut alice, "pvp").await;
    h.play(&alice, waiting.game_id, action).await;
    assert_eq!(expect_error(next(&mut alice.rx).await), "Game is not active");

    let active = h.create(&mut alice, "ai").await;
    assert!(h.coordinator.evict(active.game_id));
    h.play(&alice, active.game_id, action).await;
    assert_eq!(expect_error(next(&mut alice.rx).await), "Game not loaded");

    h.send(&alice, r#"{"type":"move","data":{"game_id":1}}"#).await;
    assert_eq!(
        expect_error(next(&mut alice.rx).await),
        "game_id, from, and to required"
    );
}

#[tokio::test]
async fn test_malformed_requests() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;

    assert_eq!(h.send(&alice, "not json").await, Flow::Continue);
    expect_error(next(&mut alice.rx).await);

    h.send(&alice, r#"{"type":"resign","data":{}}"#).await;
    assert_eq!(
        expect_error(next(&mut alice.rx).await),
        "Unknown message type: resign"
    );

    h.send(&alice, r#"{"type":"reconnect","data":{}}"#).await;
    assert_eq!(expect_error(next(&mut alice.rx).await), "game_id required");

    // Coordinates off the board fail validation before reaching the rules.
    h.send(
        &alice,
        r#"{"type":"move","data":{"game_id":1,"from":[3,3],"to":[3,8]}}"#,
    )
    .await;
    expect_error(next(&mut alice.rx).await);
}

#[tokio::test]
async fn test_reconnect_after_eviction_rebuilds_persisted_board() {
    let h = harness(Duration::ZERO);
    let (mut white, mut black, game_id) = h.pvp_match().await;

    h.play(&white, game_id, Action::new(at(3, 3), at(3, 4))).await;
    let played = expect_state(next(&mut white.rx).await);
    expect_state(next(&mut black.rx).await);

    assert!(h.coordinator.evict(game_id));
    assert!(h.coordinator.session_snapshot(game_id).await.is_none());

    let mut back = h.connect(&white.token).await;
    assert_eq!(h.reconnect(&back, game_id).await, Flow::Continue);
    let restored = expect_state(next(&mut back.rx).await);
    assert_eq!(restored.board, played.board);
    assert_eq!(restored.turn, Color::Black);
    assert_eq!(restored.status, SessionStatus::Active);
    assert_eq!(restored.legal_moves, played.legal_moves);

    // Play resumes on the rebuilt session.
    let reply = restored.legal_moves[0];
    assert_eq!(h.play(&black, game_id, reply).await, Flow::Continue);
    let after = expect_state(next(&mut back.rx).await);
    assert_eq!(after.turn, Color::White);
}

#[tokio::test]
async fn test_reconnect_requires_participant() {
    let h = harness(Duration::ZERO);
    let (_white, _black, game_id) = h.pvp_match().await;
    let mut carol = h.player("carol").await;

    h.reconnect(&carol, game_id).await;
    assert_eq!(
        expect_error(next(&mut carol.rx).await),
        "Not part of this game"
    );
    assert!(
        !h.coordinator
            .connections()
            .connected_users(game_id)
            .contains(carol.identity.user_id())
    );
}

#[tokio::test]
async fn test_disconnect_notifies_opponent() {
    let h = harness(Duration::ZERO);
    let (mut white, black, game_id) = h.pvp_match().await;
    let black_id = *black.identity.user_id();

    h.coordinator.disconnect(black_id, black.conn.id()).await;

    match next(&mut white.rx).await {
        ServerMessage::OpponentDisconnected { user_id } => assert_eq!(user_id, black_id),
        other => panic!("Expected opponent_disconnected, got {:?}", other),
    }
    let session = h
        .coordinator
        .session_snapshot(game_id)
        .await
        .expect("Session live");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(
        h.coordinator.connections().connected_users(game_id),
        vec![*white.identity.user_id()]
    );
}

#[tokio::test]
async fn test_stale_disconnect_keeps_newer_connection() {
    let h = harness(Duration::ZERO);
    let (white, _black, game_id) = h.pvp_match().await;

    let mut fresh = h.connect(&white.token).await;
    h.reconnect(&fresh, game_id).await;
    expect_state(next(&mut fresh.rx).await);

    h.coordinator
        .disconnect(*white.identity.user_id(), white.conn.id())
        .await;
    assert!(
        h.coordinator
            .connections()
            .connected_users(game_id)
            .contains(white.identity.user_id())
    );
}

#[tokio::test]
async fn test_open_games_exclude_own() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    let mut bob = h.player("bob").await;
    let created = h.create(&mut alice, "pvp").await;
    h.create(&mut alice, "ai").await;

    h.send(&bob, r#"{"type":"get_open_games","data":{}}"#).await;
    match next(&mut bob.rx).await {
        ServerMessage::OpenGames { games } => {
            assert_eq!(games.len(), 1);
            assert_eq!(games[0].game_id, created.game_id);
            assert_eq!(games[0].creator, "alice");
            assert_eq!(games[0].creator_elo, 1200.0);
        }
        other => panic!("Expected open_games, got {:?}", other),
    }

    h.send(&alice, r#"{"type":"get_open_games"}"#).await;
    match next(&mut alice.rx).await {
        ServerMessage::OpenGames { games } => assert!(games.is_empty()),
        other => panic!("Expected open_games, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let h = harness(Duration::ZERO);
    let (conn, _rx) = ConnectionHandle::channel();

    let err = h
        .coordinator
        .connect("garbage", &conn)
        .await
        .expect_err("Token should be rejected");
    assert!(err.closes_connection());
    assert_eq!(err.client_message(), "Invalid token");

    // Well-formed token for a participant that was never registered.
    let err = h
        .coordinator
        .connect(&h.auth.issue(77), &conn)
        .await
        .expect_err("Unknown user should be rejected");
    assert!(err.closes_connection());
}

#[tokio::test]
async fn test_expired_session_closes_connection() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    alice.token = h
        .auth
        .issue_at(*alice.identity.user_id(), Utc::now() - ChronoDuration::days(2));

    assert_eq!(
        h.send(&alice, r#"{"type":"get_open_games"}"#).await,
        Flow::Close
    );
    assert_eq!(expect_error(next(&mut alice.rx).await), "Session expired");
}

#[tokio::test]
async fn test_persistence_failure_keeps_live_state() {
    let h = harness(Duration::ZERO);
    let (mut white, mut black, game_id) = h.pvp_match().await;

    h.store.set_fail_writes(true);
    let action = Action::new(at(3, 3), at(3, 4));
    assert_eq!(h.play(&white, game_id, action).await, Flow::Continue);

    let broadcast = expect_state(next(&mut white.rx).await);
    assert_eq!(broadcast.turn, Color::Black);
    assert_eq!(
        expect_error(next(&mut white.rx).await),
        "Failed to save game state"
    );
    assert_eq!(expect_state(next(&mut black.rx).await), broadcast);
    assert_silent(&mut black.rx);

    let live = h
        .coordinator
        .session_snapshot(game_id)
        .await
        .expect("Session live");
    assert_eq!(live.state.turn(), Color::Black);
}

/// White needs one step, (3,7) -> (4,7), to fill its target corner.
fn white_about_to_win() -> GameState {
    let mut board = Board::empty();
    for row in 4..8 {
        for col in 4..8 {
            if (row, col) != (4, 7) {
                board.set(at(row, col), Cell::Occupied(Color::White));
            }
        }
    }
    board.set(at(3, 7), Cell::Occupied(Color::White));
    board.set(at(0, 0), Cell::Occupied(Color::Black));
    GameState::from_parts(board, Color::White)
}

#[tokio::test]
async fn test_pvp_win_completes_and_rates() {
    let h = harness(Duration::ZERO);
    let mut white = h.player("white").await;
    let mut black = h.player("black").await;
    let white_id = *white.identity.user_id();
    let black_id = *black.identity.user_id();

    let mut session = h
        .store
        .create_game(NewSession::new(white_id, GameMode::PlayerVsPlayer))
        .await
        .expect("Create failed");
    session.state = white_about_to_win();
    session.status = SessionStatus::Active;
    session.black_player_id = Some(black_id);
    h.store.save_game(&session).await.expect("Save failed");

    h.reconnect(&white, session.id).await;
    expect_state(next(&mut white.rx).await);
    h.reconnect(&black, session.id).await;
    expect_state(next(&mut black.rx).await);

    h.play(&white, session.id, Action::new(at(3, 7), at(4, 7)))
        .await;

    let final_state = expect_state(next(&mut white.rx).await);
    assert_eq!(final_state.status, SessionStatus::Completed);
    assert!(final_state.legal_moves.is_empty());
    match next(&mut white.rx).await {
        ServerMessage::GameOver { winner, winner_id } => {
            assert_eq!(winner, Color::White);
            assert_eq!(winner_id, Some(white_id));
        }
        other => panic!("Expected game_over, got {:?}", other),
    }
    expect_state(next(&mut black.rx).await);
    assert!(matches!(
        next(&mut black.rx).await,
        ServerMessage::GameOver { .. }
    ));

    let winner = h.store.get_user(white_id).await.expect("Read").expect("User");
    let loser = h.store.get_user(black_id).await.expect("Read").expect("User");
    assert!((winner.elo() - 1216.0).abs() < 1e-9);
    assert!((loser.elo() - 1184.0).abs() < 1e-9);

    let stored = h
        .store
        .get_game(session.id)
        .await
        .expect("Read")
        .expect("Game");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.winner_id, Some(white_id));
    assert!(stored.completed_at.is_some());

    // Further moves are refused.
    h.play(&black, session.id, Action::new(at(0, 0), at(0, 1)))
        .await;
    assert_eq!(expect_error(next(&mut black.rx).await), "Game is not active");
}

#[tokio::test]
async fn test_completed_session_evicted_after_last_disconnect() {
    let h = harness(Duration::ZERO);
    let alice = h.player("alice").await;
    let alice_id = *alice.identity.user_id();

    let mut session = h
        .store
        .create_game(NewSession::new(alice_id, GameMode::AgainstAgent))
        .await
        .expect("Create failed");
    session.state = white_about_to_win();
    h.store.save_game(&session).await.expect("Save failed");

    let mut alice = alice;
    h.reconnect(&alice, session.id).await;
    expect_state(next(&mut alice.rx).await);
    h.play(&alice, session.id, Action::new(at(3, 7), at(4, 7)))
        .await;
    expect_state(next(&mut alice.rx).await);
    match next(&mut alice.rx).await {
        ServerMessage::GameOver { winner, winner_id } => {
            assert_eq!(winner, Color::White);
            assert_eq!(winner_id, Some(alice_id));
        }
        other => panic!("Expected game_over, got {:?}", other),
    }

    // Ratings only move for player-vs-player matches.
    let profile = h.store.get_user(alice_id).await.expect("Read").expect("User");
    assert_eq!(*profile.elo(), 1200.0);

    h.coordinator.disconnect(alice_id, alice.conn.id()).await;
    assert!(!h.coordinator.sessions().contains(session.id));
    assert!(h.store.get_game(session.id).await.expect("Read").is_some());
}

#[tokio::test]
async fn test_reconnect_while_reply_pending_keeps_single_reply() {
    let h = harness(Duration::from_millis(300));
    let mut alice = h.player("alice").await;
    let created = h.create(&mut alice, "ai").await;
    let game_id = created.game_id;

    h.play(&alice, game_id, created.legal_moves[0]).await;
    expect_state(next(&mut alice.rx).await);
    assert!(h.coordinator.schedule_agent_move(game_id).await.is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.reconnect(&alice, game_id).await, Flow::Continue);
    let snapshot = expect_state(next(&mut alice.rx).await);
    assert_eq!(snapshot.turn, Color::Black);

    let replied = expect_state(next(&mut alice.rx).await);
    assert_eq!(replied.turn, Color::White);

    // The next reply still waits out the full delay.
    let moved_at = Instant::now();
    h.play(&alice, game_id, replied.legal_moves[0]).await;
    assert_eq!(expect_state(next(&mut alice.rx).await).turn, Color::Black);
    let second = expect_state(next(&mut alice.rx).await);
    assert_eq!(second.turn, Color::White);
    let waited = moved_at.elapsed();
    assert!(
        waited >= Duration::from_millis(250),
        "Agent replied after only {:?}",
        waited
    );
    assert_silent(&mut alice.rx);
}

#[tokio::test]
async fn test_concurrent_moves_on_one_session_apply_once() {
    let h = harness(Duration::ZERO);
    let (mut white, mut black, game_id) = h.pvp_match().await;

    let (first, second) = tokio::join!(
        h.play(&white, game_id, Action::new(at(3, 3), at(3, 4))),
        h.play(&white, game_id, Action::new(at(3, 3), at(4, 3))),
    );
    assert_eq!(first, Flow::Continue);
    assert_eq!(second, Flow::Continue);

    let state = expect_state(next(&mut white.rx).await);
    assert_eq!(state.turn, Color::Black);
    assert_eq!(expect_error(next(&mut white.rx).await), "Not your turn");
    assert_silent(&mut white.rx);
    assert_eq!(expect_state(next(&mut black.rx).await), state);
    assert_silent(&mut black.rx);

    let live = h
        .coordinator
        .session_snapshot(game_id)
        .await
        .expect("Session live");
    assert_eq!(live.state.turn(), Color::Black);
    assert_eq!(live.state.board(), &state.board);
    assert_eq!(live.state.board().count(Color::White), 16);
    assert_eq!(live.state.board().count(Color::Black), 16);
}

#[tokio::test]
async fn test_continuation_after_completion_is_noop() {
    let h = harness(Duration::from_millis(200));
    let mut alice = h.player("alice").await;
    let created = h.create(&mut alice, "ai").await;
    let game_id = created.game_id;

    h.play(&alice, game_id, created.legal_moves[0]).await;
    let after_player = expect_state(next(&mut alice.rx).await);

    // Settle the match in storage and reload it before the reply is due.
    let mut stored = h
        .store
        .get_game(game_id)
        .await
        .expect("Store read failed")
        .expect("Game stored");
    stored.status = SessionStatus::Completed;
    stored.completed_at = Some(Utc::now().naive_utc());
    h.store.save_game(&stored).await.expect("Save failed");
    assert!(h.coordinator.evict(game_id));

    assert_eq!(h.reconnect(&alice, game_id).await, Flow::Continue);
    let snapshot = expect_state(next(&mut alice.rx).await);
    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert!(h.coordinator.schedule_agent_move(game_id).await.is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_silent(&mut alice.rx);
    let live = h
        .coordinator
        .session_snapshot(game_id)
        .await
        .expect("Session live");
    assert_eq!(live.state.board(), &after_player.board);
    assert_eq!(live.state.turn(), Color::Black);
}

#[tokio::test]
async fn test_other_sessions_progress_during_agent_delay() {
    let h = harness(Duration::from_secs(1));
    let mut alice = h.player("alice").await;
    let ai_game = h.create(&mut alice, "ai").await;
    let (mut white, mut black, pvp_game) = h.pvp_match().await;

    h.play(&alice, ai_game.game_id, ai_game.legal_moves[0]).await;
    expect_state(next(&mut alice.rx).await);

    let started = Instant::now();
    let flow = tokio::time::timeout(
        Duration::from_millis(200),
        h.play(&white, pvp_game, Action::new(at(3, 3), at(3, 4))),
    )
    .await
    .expect("Move on another session was blocked");
    assert_eq!(flow, Flow::Continue);
    assert_eq!(expect_state(next(&mut white.rx).await).turn, Color::Black);
    assert_eq!(expect_state(next(&mut black.rx).await).turn, Color::Black);

    // The pending reply does not hold its own session's lock either.
    let live = tokio::time::timeout(
        Duration::from_millis(200),
        h.coordinator.session_snapshot(ai_game.game_id),
    )
    .await
    .expect("Session lock held during agent delay")
    .expect("Session live");
    assert_eq!(live.state.turn(), Color::Black);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_silent(&mut alice.rx);
}

#[tokio::test]
async fn test_waiting_session_evicted_and_still_joinable() {
    let h = harness(Duration::ZERO);
    let mut alice = h.player("alice").await;
    let mut bob = h.player("bob").await;
    let created = h.create(&mut alice, "pvp").await;

    h.coordinator
        .disconnect(*alice.identity.user_id(), alice.conn.id())
        .await;
    assert!(!h.coordinator.sessions().contains(created.game_id));

    assert_eq!(h.join(&bob, created.game_id).await, Flow::Continue);
    let started = expect_state(next(&mut bob.rx).await);
    assert_eq!(started.status, SessionStatus::Active);
    assert_eq!(started.black_player_id, Some(*bob.identity.user_id()));
    assert!(h.coordinator.sessions().contains(created.game_id));
    assert_silent(&mut alice.rx);
}
