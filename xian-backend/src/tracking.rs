//! Periodic sampling of visible players.

use std::time::{Duration, Instant};

use tracing::{debug, info};
use xian_store::TrajectoryPoint;
use xian_store::time::now_iso;

use crate::AppState;
use crate::client::{GameClient, PlayerSnapshot};
use crate::helpers::round_position;
use crate::realtime::ServerEvent;

/// A trajectory sample for `player`, stamped `time`.
pub fn trajectory_point(player: &PlayerSnapshot, time: &str) -> TrajectoryPoint {
    TrajectoryPoint {
        username: player.username.clone(),
        position: round_position(player.position),
        health: player.health,
        food: player.food,
        experience: player.experience,
        armor: player.armor,
        is_sneaking: player.is_sneaking,
        is_sprinting: player.is_sprinting,
        yaw: player.yaw,
        pitch: player.pitch,
        equipment: player.equipment(),
        time: time.to_string(),
    }
}

pub struct Tracker {
    enabled: bool,
    full_push_every: Duration,
    last_full_push: Instant,
}

impl Tracker {
    pub fn new(full_push_every: Duration) -> Self {
        Self {
            enabled: false,
            full_push_every,
            last_full_push: Instant::now(),
        }
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            info!("tracking player positions");
        }
        self.enabled = true;
        self.last_full_push = Instant::now();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Publish what the client sees and, while enabled, record every other
    /// visible player. Returns the number of samples recorded.
    pub async fn sample(&mut self, client: &dyn GameClient, state: &AppState) -> usize {
        let view = client.world();
        if !self.enabled {
            state.world.send_replace(view);
            return 0;
        }

        let now = now_iso();
        let mut recorded = 0;
        for player in view.others() {
            let point = trajectory_point(player, &now);
            state.stores.record_sample(point.clone()).await;
            state.hub.publish(ServerEvent::PlayerPosition {
                username: player.username.clone(),
                position: point,
            });
            recorded += 1;
        }
        state.world.send_replace(view);

        if self.last_full_push.elapsed() >= self.full_push_every {
            self.last_full_push = Instant::now();
            if state.hub.has_subscribers() {
                debug!("pushing full trajectories and heatmap");
                state
                    .hub
                    .publish(ServerEvent::PlayerTrajectories(state.stores.trajectories().await));
                state
                    .hub
                    .publish(ServerEvent::HeatmapData(state.stores.heatmap().await));
            }
        }
        recorded
    }
}
