use crate::error::{ensure_finite, GameError};
use log::{debug, info};
use shared::{Bullet, Player, WorldState};
use std::time::{Duration, Instant};

/// What a single simulation step did to the bullets and boxes.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub bullets_expired: Vec<u64>,
    pub bullets_hit: Vec<u64>,
    pub boxes_destroyed: Vec<u32>,
}

/// Limits how often the simulation may advance.
///
/// This is not a fixed-timestep scheduler: a step is allowed only once
/// strictly more than `min_interval` has passed since the last allowed step,
/// however often the gate is polled.
#[derive(Debug, Clone)]
pub struct TickGate {
    last_update: Instant,
    min_interval: Duration,
}

impl TickGate {
    pub fn new(min_interval: Duration, now: Instant) -> Self {
        Self {
            last_update: now,
            min_interval,
        }
    }

    /// Returns true and restarts the interval if a step is due at `now`.
    pub fn try_advance(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_update) > self.min_interval {
            self.last_update = now;
            true
        } else {
            false
        }
    }
}

/// Authoritative world plus the bookkeeping needed to mutate it.
#[derive(Debug, Clone)]
pub struct GameState {
    pub tick: u32,
    pub world: WorldState,
    next_bullet_id: u64,
}

impl GameState {
    /// Standard arena with the seeded box layout.
    pub fn new() -> Self {
        let world = WorldState::seeded();
        info!("Initialized {} boxes", world.boxes.len());
        Self::with_world(world)
    }

    pub fn with_world(world: WorldState) -> Self {
        let next_bullet_id = world.bullets.keys().next_back().map_or(0, |id| id + 1);
        Self {
            tick: 0,
            world,
            next_bullet_id,
        }
    }

    pub fn add_player(&mut self, client_id: u32) {
        let player = Player::spawn();
        info!("Added player {} at ({}, {})", client_id, player.x, player.y);
        self.world.players.insert(client_id, player);
    }

    pub fn remove_player(&mut self, client_id: &u32) -> bool {
        let removed = self.world.players.remove(client_id).is_some();
        if removed {
            info!("Removed player {}", client_id);
        }
        removed
    }

    /// Teleports the player; there is no speed or bounds check.
    pub fn move_player(&mut self, client_id: u32, x: f32, y: f32) -> Result<(), GameError> {
        let x = ensure_finite("x", x)?;
        let y = ensure_finite("y", y)?;
        let player = self.player_mut(client_id)?;
        player.x = x;
        player.y = y;
        debug!("Player {} moved to ({}, {})", client_id, x, y);
        Ok(())
    }

    /// Spawns a bullet at the shooter's position and returns its id.
    pub fn shoot(&mut self, client_id: u32, dx: f32, dy: f32) -> Result<u64, GameError> {
        let dx = ensure_finite("dx", dx)?;
        let dy = ensure_finite("dy", dy)?;
        let player = self.player_mut(client_id)?;
        let bullet = Bullet::new(player.x, player.y, dx, dy);

        let bullet_id = self.next_bullet_id;
        self.next_bullet_id += 1;
        debug!("Player {} fired bullet {}: {:?}", client_id, bullet_id, bullet);
        self.world.bullets.insert(bullet_id, bullet);
        Ok(bullet_id)
    }

    /// Arms the player. No pickup item or distance is checked.
    pub fn pickup(&mut self, client_id: u32) -> Result<(), GameError> {
        self.player_mut(client_id)?.has_gun = true;
        debug!("Player {} picked up a gun", client_id);
        Ok(())
    }

    /// Advances every bullet one step and resolves box hits.
    ///
    /// Mutations are applied immediately. The bullet id set is captured up
    /// front so removals during the pass are safe.
    pub fn update_physics(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let bullet_ids: Vec<u64> = self.world.bullets.keys().copied().collect();

        for bullet_id in bullet_ids {
            let Some(bullet) = self.world.bullets.get_mut(&bullet_id) else {
                continue;
            };
            bullet.advance();
            let bullet = *bullet;

            if !bullet.in_bounds() || bullet.is_expired() {
                self.world.bullets.remove(&bullet_id);
                report.bullets_expired.push(bullet_id);
                continue;
            }

            let hit = self
                .world
                .boxes
                .iter_mut()
                .find(|(_, obstacle)| obstacle.is_hit_by(&bullet));

            if let Some((&box_id, obstacle)) = hit {
                obstacle.hp -= 1;
                if obstacle.hp <= 0 {
                    self.world.boxes.remove(&box_id);
                    info!("Box {} destroyed", box_id);
                    report.boxes_destroyed.push(box_id);
                }
                self.world.bullets.remove(&bullet_id);
                report.bullets_hit.push(bullet_id);
            }
        }

        self.tick = self.tick.wrapping_add(1);
        report
    }

    pub fn snapshot(&self) -> WorldState {
        self.world.clone()
    }

    fn player_mut(&mut self, client_id: u32) -> Result<&mut Player, GameError> {
        self.world
            .players
            .get_mut(&client_id)
            .ok_or(GameError::UnknownConnection(client_id))
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Obstacle, BULLET_LIFE, WORLD_HEIGHT, WORLD_WIDTH};

    fn world_with_boxes(boxes: impl IntoIterator<Item = (u32, Obstacle)>) -> WorldState {
        WorldState {
            boxes: boxes.into_iter().collect(),
            ..Default::default()
        }
    }

    fn single_box(hp: i32) -> GameState {
        GameState::with_world(world_with_boxes([(0, Obstacle::new(100.0, 100.0, hp))]))
    }

    fn empty_arena() -> GameState {
        GameState::with_world(WorldState::default())
    }

    #[test]
    fn test_new_game_has_seeded_boxes() {
        let game = GameState::new();
        assert_eq!(game.tick, 0);
        assert_eq!(game.world.boxes.len(), 10);
        assert!(game.world.players.is_empty());
        assert!(game.world.bullets.is_empty());
    }

    #[test]
    fn test_connects_create_spawned_players() {
        let mut game = GameState::new();
        for id in [3, 1, 2, 3] {
            game.add_player(id);
        }

        let mut ids: Vec<u32> = game.world.players.keys().copied().collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        for player in game.world.players.values() {
            assert_eq!(*player, Player::spawn());
        }
    }

    #[test]
    fn test_move_only_affects_issuer() {
        let mut game = GameState::new();
        game.add_player(1);
        game.add_player(2);

        game.move_player(1, 5000.0, -20.0).unwrap();

        assert_eq!(game.world.players[&1].x, 5000.0);
        assert_eq!(game.world.players[&1].y, -20.0);
        assert_eq!(game.world.players[&2], Player::spawn());
    }

    #[test]
    fn test_move_unknown_connection() {
        let mut game = GameState::new();
        let before = game.snapshot();

        let result = game.move_player(9, 1.0, 1.0);

        assert_eq!(result, Err(GameError::UnknownConnection(9)));
        assert_eq!(game.snapshot(), before);
    }

    #[test]
    fn test_non_finite_payload_is_rejected() {
        let mut game = GameState::new();
        game.add_player(1);

        assert!(matches!(
            game.move_player(1, f32::NAN, 1.0),
            Err(GameError::InvalidPayload { field: "x", .. })
        ));
        assert!(matches!(
            game.shoot(1, 1.0, f32::INFINITY),
            Err(GameError::InvalidPayload { field: "dy", .. })
        ));
        assert_eq!(game.world.players[&1], Player::spawn());
        assert!(game.world.bullets.is_empty());
    }

    #[test]
    fn test_shoot_spawns_bullet_at_shooter() {
        let mut game = GameState::new();
        game.add_player(1);
        game.move_player(1, 30.0, 40.0).unwrap();

        let id = game.shoot(1, 2.0, -1.0).unwrap();

        assert_eq!(game.world.bullets.len(), 1);
        let bullet = game.world.bullets[&id];
        assert_eq!((bullet.x, bullet.y), (30.0, 40.0));
        assert_eq!((bullet.dx, bullet.dy), (2.0, -1.0));
        assert_eq!(bullet.life, BULLET_LIFE);
    }

    #[test]
    fn test_shoot_unknown_connection() {
        let mut game = GameState::new();
        assert_eq!(game.shoot(4, 1.0, 0.0), Err(GameError::UnknownConnection(4)));
        assert!(game.world.bullets.is_empty());
    }

    #[test]
    fn test_bullet_ids_never_reused() {
        let mut game = empty_arena();
        game.add_player(1);
        game.move_player(1, 10.0, 10.0).unwrap();

        let first = game.shoot(1, -50.0, 0.0).unwrap();
        let second = game.shoot(1, 0.0, 0.0).unwrap();
        game.update_physics();
        assert!(!game.world.bullets.contains_key(&first));

        let third = game.shoot(1, 0.0, 0.0).unwrap();

        assert_ne!(third, first);
        assert_ne!(third, second);
        assert_eq!(game.world.bullets.len(), 2);
    }

    #[test]
    fn test_with_world_continues_bullet_ids() {
        let mut world = WorldState::default();
        world.bullets.insert(41, Bullet::new(1.0, 1.0, 0.0, 0.0));
        world.players.insert(1, Player::spawn());
        let mut game = GameState::with_world(world);

        assert_eq!(game.shoot(1, 0.0, 0.0), Ok(42));
    }

    #[test]
    fn test_pickup_is_unconditional() {
        let mut game = GameState::new();
        game.add_player(1);
        game.add_player(2);
        game.move_player(1, 0.0, 0.0).unwrap();

        game.pickup(1).unwrap();

        assert!(game.world.players[&1].has_gun);
        assert!(!game.world.players[&2].has_gun);
        assert_eq!(game.pickup(3), Err(GameError::UnknownConnection(3)));
    }

    #[test]
    fn test_remove_player() {
        let mut game = GameState::new();
        game.add_player(1);

        assert!(game.remove_player(&1));
        assert!(!game.remove_player(&1));
        assert!(game.world.players.is_empty());
    }

    #[test]
    fn test_bullet_integrates_position() {
        let mut game = empty_arena();
        game.add_player(1);
        game.move_player(1, 10.0, 10.0).unwrap();
        let id = game.shoot(1, 2.5, 1.25).unwrap();

        game.update_physics();
        game.update_physics();

        let bullet = game.world.bullets[&id];
        assert_approx_eq!(bullet.x, 15.0, 0.0001);
        assert_approx_eq!(bullet.y, 12.5, 0.0001);
        assert_eq!(bullet.life, BULLET_LIFE - 2);
        assert_eq!(game.tick, 2);
    }

    #[test]
    fn test_box_hit_scenario() {
        let mut game = single_box(3);
        game.add_player(1);
        game.move_player(1, 100.0, 100.0).unwrap();
        let id = game.shoot(1, 0.0, 0.0).unwrap();

        let report = game.update_physics();

        assert_eq!(game.world.boxes[&0].hp, 2);
        assert!(game.world.bullets.is_empty());
        assert_eq!(report.bullets_hit, vec![id]);
        assert!(report.bullets_expired.is_empty());
        assert!(report.boxes_destroyed.is_empty());
    }

    #[test]
    fn test_box_hp_boundaries() {
        let mut game = single_box(2);
        game.add_player(1);
        game.move_player(1, 100.0, 100.0).unwrap();

        game.shoot(1, 0.0, 0.0).unwrap();
        game.update_physics();
        assert_eq!(game.world.boxes[&0].hp, 1);

        game.shoot(1, 0.0, 0.0).unwrap();
        let report = game.update_physics();
        assert!(game.world.boxes.is_empty());
        assert_eq!(report.boxes_destroyed, vec![0]);
    }

    #[test]
    fn test_zero_hp_box_is_removed_on_hit() {
        let mut game = single_box(0);
        game.add_player(1);
        game.move_player(1, 100.0, 100.0).unwrap();
        game.shoot(1, 0.0, 0.0).unwrap();

        game.update_physics();

        assert!(game.world.boxes.is_empty());
    }

    #[test]
    fn test_one_hit_per_bullet_per_tick() {
        let mut game = single_box(3);
        game.add_player(1);
        game.move_player(1, 100.0, 100.0).unwrap();
        game.shoot(1, 0.0, 0.0).unwrap();
        game.shoot(1, 0.0, 0.0).unwrap();

        let report = game.update_physics();

        assert_eq!(report.bullets_hit.len(), 2);
        assert_eq!(game.world.boxes[&0].hp, 1);
        assert!(game.world.bullets.is_empty());
    }

    #[test]
    fn test_overlapping_boxes_hit_lowest_id_first() {
        let world = world_with_boxes([
            (4, Obstacle::new(105.0, 100.0, 3)),
            (2, Obstacle::new(100.0, 105.0, 3)),
        ]);
        let mut game = GameState::with_world(world);
        game.add_player(1);
        game.move_player(1, 100.0, 100.0).unwrap();
        game.shoot(1, 0.0, 0.0).unwrap();

        game.update_physics();

        assert_eq!(game.world.boxes[&2].hp, 2);
        assert_eq!(game.world.boxes[&4].hp, 3);
    }

    #[test]
    fn test_out_of_bounds_bullet_removed() {
        let mut game = empty_arena();
        game.add_player(1);
        game.move_player(1, WORLD_WIDTH - 1.0, 10.0).unwrap();
        let id = game.shoot(1, 5.0, 0.0).unwrap();

        let report = game.update_physics();

        assert!(game.world.bullets.is_empty());
        assert_eq!(report.bullets_expired, vec![id]);

        let again = game.update_physics();
        assert_eq!(again, TickReport::default());
    }

    #[test]
    fn test_out_of_bounds_skips_collision() {
        let world = world_with_boxes([(0, Obstacle::new(0.0, 10.0, 1))]);
        let mut game = GameState::with_world(world);
        game.add_player(1);
        game.move_player(1, 2.0, 10.0).unwrap();
        game.shoot(1, -3.0, 0.0).unwrap();

        game.update_physics();

        assert_eq!(game.world.boxes[&0].hp, 1);
        assert!(game.world.bullets.is_empty());
    }

    #[test]
    fn test_bullet_expires_after_life() {
        let mut game = empty_arena();
        game.add_player(1);
        game.move_player(1, 10.0, WORLD_HEIGHT / 2.0).unwrap();
        let id = game.shoot(1, 0.0, 0.0).unwrap();

        for _ in 0..BULLET_LIFE - 1 {
            game.update_physics();
        }
        assert_eq!(game.world.bullets[&id].life, 1);

        let report = game.update_physics();
        assert!(game.world.bullets.is_empty());
        assert_eq!(report.bullets_expired, vec![id]);
    }

    #[test]
    fn test_tick_gate_requires_strictly_more_than_interval() {
        let start = Instant::now();
        let mut gate = TickGate::new(Duration::from_millis(100), start);

        assert!(!gate.try_advance(start + Duration::from_millis(50)));
        assert!(!gate.try_advance(start + Duration::from_millis(100)));
        assert!(gate.try_advance(start + Duration::from_millis(101)));
        assert!(!gate.try_advance(start + Duration::from_millis(150)));
        assert!(gate.try_advance(start + Duration::from_millis(202)));
    }

    #[test]
    fn test_tick_gate_ignores_clock_going_backwards() {
        let start = Instant::now() + Duration::from_secs(1);
        let mut gate = TickGate::new(Duration::from_millis(100), start);

        assert!(!gate.try_advance(start - Duration::from_millis(500)));
    }
}
