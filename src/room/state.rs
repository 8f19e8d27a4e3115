//! Room state and transitions
//!
//! Every client command reduces to one of the small transition methods
//! here, applied under the room's store lock. The methods keep the room
//! invariants: no duplicate queue entries, volume within `0..=100`, and a
//! stopped player whenever nothing is loaded.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::protocol::CommandError;
use crate::ClientId;

use super::video::Video;

/// Shared playback state of one room.
///
/// Persisted as a single JSON blob under `room:<id>`; the repository is the
/// only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// 6-digit numeric code
    pub id: String,

    /// Plaintext or one-way hash depending on the configured scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Identity that created the room; never changes
    pub creator_id: ClientId,

    /// Currently joined connection identities, in join order
    #[serde(default)]
    pub clients: Vec<ClientId>,

    /// Upcoming videos; the head plays next
    #[serde(default)]
    pub video_queue: Vec<Video>,

    /// Finished videos; the head is the most recent
    #[serde(default)]
    pub history_queue: Vec<Video>,

    #[serde(default)]
    pub playing_now: Option<Video>,

    #[serde(default)]
    pub is_playing: bool,

    /// Advisory playback position in seconds, reported by clients
    #[serde(default)]
    pub current_time: f64,

    pub volume: u8,

    /// Unix milliseconds of the last successful mutation or join/leave
    pub last_activity: i64,
}

impl Room {
    pub fn new(id: String, creator_id: ClientId, password: Option<String>, now: i64) -> Self {
        Self {
            id,
            password,
            creator_id,
            clients: Vec::new(),
            video_queue: Vec::new(),
            history_queue: Vec::new(),
            playing_now: None,
            is_playing: false,
            current_time: 0.0,
            volume: 100,
            last_activity: now,
        }
    }

    pub fn storage_key(id: &str) -> String {
        format!("room:{id}")
    }

    /// Record activity. Called by the repository on every successful
    /// mutation so eviction timing matches what clients observed.
    pub fn touch(&mut self, now: i64) {
        self.last_activity = now;
    }

    // ---- membership ------------------------------------------------------

    pub fn add_client(&mut self, client_id: &ClientId) {
        if !self.clients.contains(client_id) {
            self.clients.push(client_id.clone());
        }
    }

    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.retain(|c| c != client_id);
    }

    // ---- queue -----------------------------------------------------------

    pub fn queue_contains(&self, video_id: &str) -> bool {
        self.video_queue.iter().any(|v| v.id == video_id)
    }

    /// Queue a video, or start it immediately when the player is idle and
    /// the queue is empty.
    pub fn add_video(&mut self, video: Video) -> Result<(), CommandError> {
        if self.queue_contains(&video.id) {
            return Err(CommandError::AlreadyInQueue);
        }
        if self.playing_now.is_none() && self.video_queue.is_empty() {
            self.start(video);
        } else {
            self.video_queue.push(video);
        }
        Ok(())
    }

    /// Queue a video at position 0, replacing any earlier occurrence, or
    /// start it immediately when the player is idle and the queue is empty.
    pub fn add_video_to_top(&mut self, video: Video) {
        self.video_queue.retain(|v| v.id != video.id);
        if self.playing_now.is_none() && self.video_queue.is_empty() {
            self.start(video);
        } else {
            self.video_queue.insert(0, video);
        }
    }

    pub fn remove_from_queue(&mut self, video_id: &str) {
        self.video_queue.retain(|v| v.id != video_id);
    }

    pub fn move_to_top(&mut self, video_id: &str) -> Result<(), CommandError> {
        let position = self
            .video_queue
            .iter()
            .position(|v| v.id == video_id)
            .ok_or(CommandError::VideoNotFound)?;
        let video = self.video_queue.remove(position);
        self.video_queue.insert(0, video);
        Ok(())
    }

    pub fn shuffle_queue<R: Rng>(&mut self, rng: &mut R) {
        self.video_queue.shuffle(rng);
    }

    pub fn clear_queue(&mut self) {
        self.video_queue.clear();
    }

    pub fn clear_history(&mut self) {
        self.history_queue.clear();
    }

    // ---- playback --------------------------------------------------------

    fn start(&mut self, video: Video) {
        self.playing_now = Some(video);
        self.is_playing = true;
        self.current_time = 0.0;
    }

    fn stop(&mut self) {
        self.playing_now = None;
        self.is_playing = false;
        self.current_time = 0.0;
    }

    /// Prepend to history, dropping any earlier entry with the same id.
    /// `limit` bounds the history length when configured.
    fn push_history(&mut self, video: Video, limit: Option<usize>) {
        self.history_queue.retain(|v| v.id != video.id);
        self.history_queue.insert(0, video);
        if let Some(limit) = limit {
            self.history_queue.truncate(limit);
        }
    }

    /// Force a video to play now. The interrupted video moves to the head
    /// of history; the forced video disappears from queue and history.
    pub fn play_now(&mut self, video: Video, history_limit: Option<usize>) {
        self.video_queue.retain(|v| v.id != video.id);
        self.history_queue.retain(|v| v.id != video.id);
        if let Some(previous) = self.playing_now.take() {
            self.push_history(previous, history_limit);
        }
        self.start(video);
    }

    /// Rotate to the next queued video, or stop when the queue is empty.
    pub fn advance(&mut self, history_limit: Option<usize>) {
        if let Some(finished) = self.playing_now.take() {
            self.push_history(finished, history_limit);
        }
        if self.video_queue.is_empty() {
            self.stop();
        } else {
            let next = self.video_queue.remove(0);
            self.start(next);
        }
    }

    /// Append imported videos that are not queued yet, then start playback
    /// when the player was idle and the import brought something to play.
    pub fn import_videos(&mut self, videos: Vec<Video>) {
        for video in videos {
            if !self.queue_contains(&video.id) {
                self.video_queue.push(video);
            }
        }
        if self.playing_now.is_none() && !self.video_queue.is_empty() {
            let next = self.video_queue.remove(0);
            self.start(next);
        }
    }

    pub fn play(&mut self) {
        self.is_playing = true;
    }

    pub fn pause(&mut self) {
        self.is_playing = false;
    }

    /// Restart the loaded video from zero. Rejected when nothing is loaded.
    pub fn replay(&mut self) -> Result<(), CommandError> {
        if self.playing_now.is_none() {
            return Err(CommandError::InvalidMessage);
        }
        self.current_time = 0.0;
        self.is_playing = true;
        Ok(())
    }

    /// Set the advisory position. Rejects values that would break the
    /// non-negative invariant.
    pub fn seek(&mut self, time: f64) -> Result<(), CommandError> {
        if !time.is_finite() || time < 0.0 {
            return Err(CommandError::InvalidMessage);
        }
        self.current_time = time;
        Ok(())
    }

    /// Clamp and store the volume.
    pub fn set_volume(&mut self, volume: f64) -> Result<(), CommandError> {
        if !volume.is_finite() {
            return Err(CommandError::InvalidMessage);
        }
        self.volume = volume.clamp(0.0, 100.0).round() as u8;
        Ok(())
    }

    // ---- projections -----------------------------------------------------

    /// Outbound view without the member list, for `roomUpdate`.
    pub fn view(&self) -> RoomView {
        self.project(false)
    }

    /// Outbound view including the member list, for `roomJoined`.
    pub fn view_with_clients(&self) -> RoomView {
        self.project(true)
    }

    fn project(&self, with_clients: bool) -> RoomView {
        RoomView {
            id: self.id.clone(),
            creator_id: self.creator_id.clone(),
            clients: with_clients.then(|| self.clients.clone()),
            video_queue: self.video_queue.clone(),
            history_queue: self.history_queue.clone(),
            playing_now: self.playing_now.clone(),
            is_playing: self.is_playing,
            current_time: self.current_time,
            volume: self.volume,
        }
    }
}

/// What clients see of a room. Never carries the password; carries the
/// member list only on join replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: String,
    pub creator_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<ClientId>>,
    pub video_queue: Vec<Video>,
    pub history_queue: Vec<Video>,
    #[serde(default)]
    pub playing_now: Option<Video>,
    pub is_playing: bool,
    pub current_time: f64,
    pub volume: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room::new("123456".to_string(), "creator".to_string(), None, 0)
    }

    fn v(id: &str) -> Video {
        Video::with_id(id)
    }

    #[test]
    fn test_new_room_defaults() {
        let room = room();
        assert_eq!(room.volume, 100);
        assert!(!room.is_playing);
        assert!(room.playing_now.is_none());
        assert_eq!(room.current_time, 0.0);
        assert!(room.video_queue.is_empty());
    }

    #[test]
    fn test_add_client_is_idempotent() {
        let mut room = room();
        let a = "a".to_string();
        room.add_client(&a);
        room.add_client(&a);
        assert_eq!(room.clients, vec!["a".to_string()]);

        room.remove_client(&a);
        assert!(room.clients.is_empty());
    }

    #[test]
    fn test_add_video_starts_when_idle() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();

        assert_eq!(room.playing_now.as_ref().unwrap().id, "v1");
        assert!(room.is_playing);
        assert_eq!(room.current_time, 0.0);
        assert!(room.video_queue.is_empty());
    }

    #[test]
    fn test_add_video_queues_when_busy() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();

        assert_eq!(room.playing_now.as_ref().unwrap().id, "v1");
        assert_eq!(room.video_queue.len(), 1);
        assert_eq!(room.video_queue[0].id, "v2");
    }

    #[test]
    fn test_add_video_rejects_duplicate() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();

        assert_eq!(room.add_video(v("v2")), Err(CommandError::AlreadyInQueue));
        assert_eq!(room.video_queue.len(), 1);
    }

    #[test]
    fn test_add_remove_round_trips() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();
        let before = room.video_queue.clone();

        room.add_video(v("v3")).unwrap();
        room.remove_from_queue("v3");

        assert_eq!(room.video_queue, before);
        assert_eq!(room.playing_now.as_ref().unwrap().id, "v1");
    }

    #[test]
    fn test_add_video_to_top_replaces_occurrence() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();
        room.add_video(v("v3")).unwrap();

        room.add_video_to_top(v("v3"));
        let ids: Vec<&str> = room.video_queue.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v3", "v2"]);
    }

    #[test]
    fn test_move_to_top_is_idempotent() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        for id in ["v2", "v3", "v4"] {
            room.add_video(v(id)).unwrap();
        }

        room.move_to_top("v4").unwrap();
        let once: Vec<String> = room.video_queue.iter().map(|v| v.id.clone()).collect();
        room.move_to_top("v4").unwrap();
        let twice: Vec<String> = room.video_queue.iter().map(|v| v.id.clone()).collect();

        assert_eq!(once, vec!["v4", "v2", "v3"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_move_to_top_missing_video() {
        let mut room = room();
        assert_eq!(room.move_to_top("nope"), Err(CommandError::VideoNotFound));
    }

    #[test]
    fn test_shuffle_preserves_multiset() {
        let mut room = room();
        room.add_video(v("v0")).unwrap();
        for i in 1..=20 {
            room.add_video(v(&format!("v{i}"))).unwrap();
        }

        let mut before: Vec<String> = room.video_queue.iter().map(|v| v.id.clone()).collect();
        room.shuffle_queue(&mut rand::thread_rng());
        let mut after: Vec<String> = room.video_queue.iter().map(|v| v.id.clone()).collect();

        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_advance_rotates_queue_to_history() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();
        room.add_video(v("v3")).unwrap();
        room.pause();

        room.advance(None);

        assert_eq!(room.playing_now.as_ref().unwrap().id, "v2");
        assert!(room.is_playing);
        assert_eq!(room.current_time, 0.0);
        assert_eq!(room.video_queue.len(), 1);
        assert_eq!(room.video_queue[0].id, "v3");
        assert_eq!(room.history_queue.len(), 1);
        assert_eq!(room.history_queue[0].id, "v1");
    }

    #[test]
    fn test_advance_on_empty_queue_stops() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();

        room.advance(None);

        assert!(room.playing_now.is_none());
        assert!(!room.is_playing);
        assert_eq!(room.current_time, 0.0);
        assert_eq!(room.history_queue[0].id, "v1");
    }

    #[test]
    fn test_history_dedups_on_insert() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.advance(None);
        room.add_video(v("v2")).unwrap();
        room.advance(None);
        // v1 finishes a second time and must move back to the head alone.
        room.add_video(v("v1")).unwrap();
        room.advance(None);

        let ids: Vec<&str> = room.history_queue.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2"]);
    }

    #[test]
    fn test_history_limit_applies() {
        let mut room = room();
        for i in 0..5 {
            room.add_video(v(&format!("v{i}"))).unwrap();
            room.advance(Some(3));
        }
        assert_eq!(room.history_queue.len(), 3);
        assert_eq!(room.history_queue[0].id, "v4");
    }

    #[test]
    fn test_play_now_interrupts_and_dedups() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();
        room.add_video(v("v3")).unwrap();

        room.play_now(v("v3"), None);

        assert_eq!(room.playing_now.as_ref().unwrap().id, "v3");
        assert!(room.is_playing);
        // v3 left the queue, v1 went to history.
        assert_eq!(room.video_queue.len(), 1);
        assert_eq!(room.video_queue[0].id, "v2");
        assert_eq!(room.history_queue[0].id, "v1");
    }

    #[test]
    fn test_import_skips_duplicates_and_starts_playback() {
        let mut room = room();
        room.import_videos(vec![v("v1"), v("v2"), v("v1"), v("v3")]);

        assert_eq!(room.playing_now.as_ref().unwrap().id, "v1");
        assert!(room.is_playing);
        let ids: Vec<&str> = room.video_queue.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v3"]);
    }

    #[test]
    fn test_import_into_busy_room_only_appends() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();

        room.import_videos(vec![v("v2"), v("v3")]);

        assert_eq!(room.playing_now.as_ref().unwrap().id, "v1");
        let ids: Vec<&str> = room.video_queue.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v3"]);
    }

    #[test]
    fn test_pause_play_laws() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();

        room.pause();
        room.pause();
        assert!(!room.is_playing);
        room.play();
        room.play();
        assert!(room.is_playing);
        room.play();
        room.pause();
        assert!(!room.is_playing);
    }

    #[test]
    fn test_replay_requires_loaded_video() {
        let mut room = room();
        assert_eq!(room.replay(), Err(CommandError::InvalidMessage));

        room.add_video(v("v1")).unwrap();
        room.seek(55.0).unwrap();
        room.pause();
        room.replay().unwrap();
        assert_eq!(room.current_time, 0.0);
        assert!(room.is_playing);
    }

    #[test]
    fn test_seek_rejects_negative_and_nan() {
        let mut room = room();
        assert_eq!(room.seek(-1.0), Err(CommandError::InvalidMessage));
        assert_eq!(room.seek(f64::NAN), Err(CommandError::InvalidMessage));
        room.seek(0.0).unwrap();
        room.seek(3600.5).unwrap();
        assert_eq!(room.current_time, 3600.5);
    }

    #[test]
    fn test_volume_clamps() {
        let mut room = room();
        room.set_volume(-5.0).unwrap();
        assert_eq!(room.volume, 0);
        room.set_volume(250.0).unwrap();
        assert_eq!(room.volume, 100);
        room.set_volume(37.0).unwrap();
        assert_eq!(room.volume, 37);
    }

    #[test]
    fn test_view_strips_clients_and_password() {
        let mut room = Room::new(
            "123456".to_string(),
            "creator".to_string(),
            Some("hunter2".to_string()),
            0,
        );
        room.add_client(&"a".to_string());

        let update = serde_json::to_value(room.view()).unwrap();
        assert!(update.get("clients").is_none());
        assert!(update.get("password").is_none());

        let joined = serde_json::to_value(room.view_with_clients()).unwrap();
        assert_eq!(joined["clients"][0], "a");
        assert!(joined.get("password").is_none());
    }

    #[test]
    fn test_blob_round_trip() {
        let mut room = room();
        room.add_video(v("v1")).unwrap();
        room.add_video(v("v2")).unwrap();
        room.touch(1_700_000_000_000);

        let blob = serde_json::to_vec(&room).unwrap();
        let restored: Room = serde_json::from_slice(&blob).unwrap();

        assert_eq!(restored.id, room.id);
        assert_eq!(restored.playing_now, room.playing_now);
        assert_eq!(restored.video_queue, room.video_queue);
        assert_eq!(restored.last_activity, 1_700_000_000_000);
    }
}
