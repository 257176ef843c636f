use crate::AppState;
use crate::error::AppError;
use crate::helpers::{distance, round_position};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_macros::debug_handler;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use xian_store::persistence::LAST_LOGIN_FILE;
use xian_store::query::{self, DEFAULT_HEATMAP_LIMIT, DEFAULT_LIMIT, Page, PageRequest, TimeRange};
use xian_store::time::now_iso;
use xian_store::{DataStats, HeatmapPoint, Position, TrajectoryPoint};

/// Raw query string parameters. Everything is optional and coerced, never
/// rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    limit: Option<String>,
    offset: Option<String>,
    username: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    event_type: Option<String>,
    max_distance: Option<String>,
}

impl ListQuery {
    fn page_request(&self, default_limit: usize) -> PageRequest {
        PageRequest::from_raw(self.limit.as_deref(), self.offset.as_deref(), default_limit)
            .with_range(TimeRange::from_raw(
                self.start_time.as_deref(),
                self.end_time.as_deref(),
            ))
    }

    /// Empty strings count as absent.
    fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|name| !name.is_empty())
    }

    fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref().filter(|kind| !kind.is_empty())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    total_points: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_players: Option<usize>,
    limit: usize,
    offset: usize,
    has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_type: Option<String>,
    timestamp: String,
}

impl PageMetadata {
    fn new<T>(page: &Page<T>) -> Self {
        Self {
            total_points: None,
            total_entries: None,
            total_players: None,
            limit: page.limit,
            offset: page.offset,
            has_more: page.has_more,
            username: None,
            event_type: None,
            timestamp: now_iso(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct Paged<D, M = PageMetadata> {
    data: D,
    metadata: M,
}

#[debug_handler]
pub(crate) async fn trajectories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    // The list endpoint pages each player's series but never filters by time
    let request = PageRequest::from_raw(
        params.limit.as_deref(),
        params.offset.as_deref(),
        DEFAULT_LIMIT,
    );

    let series: BTreeMap<String, Vec<TrajectoryPoint>> = match params.username() {
        Some(name) => state
            .stores
            .trajectory(name)
            .await
            .map(|points| BTreeMap::from([(name.to_string(), points)]))
            .unwrap_or_default(),
        None => state.stores.trajectories().await,
    };

    let mut has_more = false;
    let mut data = BTreeMap::new();
    for (name, points) in series {
        let page = query::page_all(&points, &request);
        has_more |= page.has_more;
        if !page.data.is_empty() {
            data.insert(name, page.data);
        }
    }

    let total_players = match params.username() {
        Some(_) => 1,
        None => state.stores.stats().await.trajectories,
    };
    let metadata = PageMetadata {
        total_players: Some(total_players),
        username: params.username().map(str::to_string),
        // Only meaningful for a single player
        has_more: params.username().is_some() && has_more,
        ..PageMetadata::new(&Page::<()>::empty(&request))
    };
    Json(Paged { data, metadata })
}

pub(crate) async fn player_trajectory(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let request = params.page_request(DEFAULT_LIMIT);
    let page = match state.stores.trajectory(&username).await {
        Some(points) => query::page(&points, &request, |_| true),
        None => Page::empty(&request),
    };
    let metadata = PageMetadata {
        total_points: Some(page.total),
        username: Some(username),
        ..PageMetadata::new(&page)
    };
    Json(Paged {
        data: page.data,
        metadata,
    })
}

pub(crate) async fn heatmap(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let request = params.page_request(DEFAULT_HEATMAP_LIMIT);
    let points = state.stores.heatmap().await;
    let username = params.username();
    let page = query::page(&points, &request, |point: &HeatmapPoint| {
        username.is_none_or(|name| point.username == name)
    });
    let metadata = PageMetadata {
        total_points: Some(page.total),
        username: username.map(str::to_string),
        ..PageMetadata::new(&page)
    };
    Json(Paged {
        data: page.data,
        metadata,
    })
}

pub(crate) async fn activity_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let request = params.page_request(DEFAULT_LIMIT);
    let entries = state.stores.activity().await;
    let event_type = params.event_type();
    let page = query::page(&entries, &request, |entry| {
        event_type.is_none_or(|kind| entry.event.as_str() == kind)
    });
    let metadata = PageMetadata {
        total_entries: Some(page.total),
        event_type: event_type.map(str::to_string),
        ..PageMetadata::new(&page)
    };
    Json(Paged {
        data: page.data,
        metadata,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerInfoResponse {
    host: String,
    port: u16,
    target_player: String,
    command_delay: u64,
    web_port: u16,
    bot_state: String,
    player_count: usize,
    data_stats: DataStats,
}

pub(crate) async fn server_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let info = &state.info;
    let player_count = state.world.borrow().player_count;
    Json(ServerInfoResponse {
        host: info.host.clone(),
        port: info.port,
        target_player: info.target_player.clone(),
        command_delay: info.command_delay,
        web_port: info.web_port,
        bot_state: state.hub.status(),
        player_count,
        data_stats: state.stores.stats().await,
    })
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

pub(crate) async fn last_login(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let login = state
        .data_dir
        .read_json::<serde_json::Value>(LAST_LOGIN_FILE)?;
    Ok(match login {
        Some(login) => Json(login).into_response(),
        None => Json(Message {
            message: "No login information found",
        })
        .into_response(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RadarPlayer {
    username: String,
    position: Position,
    distance: i64,
    health: f64,
    is_sneaking: bool,
    is_sprinting: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RadarMetadata {
    timestamp: String,
    bot_position: Option<Position>,
    player_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_distance: Option<i64>,
}

const DEFAULT_RADAR_DISTANCE: i64 = 100;

pub(crate) async fn radar(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let view = state.world.borrow().clone();
    let Some(bot_position) = view.position else {
        return Json(Paged {
            data: Vec::new(),
            metadata: RadarMetadata {
                timestamp: now_iso(),
                bot_position: None,
                player_count: 0,
                max_distance: None,
            },
        });
    };

    let max_distance = params
        .max_distance
        .as_deref()
        .and_then(query::parse_int)
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_RADAR_DISTANCE);

    let data: Vec<RadarPlayer> = view
        .others()
        .filter_map(|player| {
            let distance = distance(bot_position, player.position);
            (distance <= max_distance as f64).then(|| RadarPlayer {
                username: player.username.clone(),
                position: round_position(player.position),
                distance: distance.round() as i64,
                health: player.health,
                is_sneaking: player.is_sneaking,
                is_sprinting: player.is_sprinting,
            })
        })
        .collect();

    Json(Paged {
        metadata: RadarMetadata {
            timestamp: now_iso(),
            bot_position: Some(round_position(bot_position)),
            player_count: data.len(),
            max_distance: Some(max_distance),
        },
        data,
    })
}

#[derive(Serialize)]
pub(crate) struct LatestPlayer {
    username: String,
    position: Position,
    health: f64,
    distance: i64,
}

#[derive(Serialize)]
pub(crate) struct LatestData {
    players: Vec<LatestPlayer>,
    timestamp: String,
}

pub(crate) async fn latest_data(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.world.borrow().clone();
    let players = match view.position {
        Some(bot_position) => view
            .others()
            .map(|player| LatestPlayer {
                username: player.username.clone(),
                position: round_position(player.position),
                health: player.health,
                distance: distance(bot_position, player.position).round() as i64,
            })
            .collect(),
        None => Vec::new(),
    };
    Json(LatestData {
        players,
        timestamp: now_iso(),
    })
}

#[derive(Serialize)]
struct Cleared {
    success: bool,
    message: &'static str,
}

#[debug_handler]
pub(crate) async fn clear_records(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    state.stores.clear().await;
    let removed = state
        .data_dir
        .clear_json_files()
        .map_err(AppError::ClearFailed)?;
    tracing::info!(files = ?removed, "all records cleared");

    Ok((
        StatusCode::OK,
        Json(Cleared {
            success: true,
            message: "All records cleared successfully",
        }),
    ))
}
