//! Command dispatcher
//!
//! The state machine behind every inbound frame. Each command validates,
//! runs its transition inside [`RoomRepository::mutate`] (so concurrent
//! commands on one room serialize), and publishes the resulting event
//! through the bus. A failed command mutates nothing and answers the
//! sender with an `errorWithCode` frame; the connection stays up.

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{EmbedCache, VideoCatalog, PLAYLIST_EXPANSION_LIMIT};
use crate::protocol::{parse_frame, ClientCommand, CommandError, ServerEvent};
use crate::registry::{ClientDirectory, RoomBus};
use crate::room::{now_ms, Room, RoomRepository, Video};
use crate::server::ServerConfig;
use crate::ClientId;

/// Cost parameter of the one-way password scheme.
const PASSWORD_HASH_COST: u32 = 4;

/// Entries imported per batch during playlist expansion.
const IMPORT_BATCH_SIZE: usize = 50;

/// Pause between playlist import batches.
const IMPORT_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// How often a room creation retries after an id collision lost a race.
const CREATE_RETRY_LIMIT: usize = 5;

/// The command state machine
pub struct Dispatcher {
    config: ServerConfig,
    rooms: Arc<RoomRepository>,
    directory: Arc<ClientDirectory>,
    bus: Arc<RoomBus>,
    catalog: Arc<dyn VideoCatalog>,
    embed: Arc<EmbedCache>,
}

impl Dispatcher {
    pub fn new(
        config: ServerConfig,
        rooms: Arc<RoomRepository>,
        directory: Arc<ClientDirectory>,
        bus: Arc<RoomBus>,
        catalog: Arc<dyn VideoCatalog>,
        embed: Arc<EmbedCache>,
    ) -> Self {
        Self {
            config,
            rooms,
            directory,
            bus,
            catalog,
            embed,
        }
    }

    /// Process one raw text frame from `sender`.
    ///
    /// Never fails outward; every failure mode answers the sender and the
    /// read loop continues.
    pub async fn handle_frame(&self, sender: &ClientId, text: &str) {
        let envelope = match parse_frame(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.bus.send_local(sender, ServerEvent::error_with_code(&e));
                return;
            }
        };

        if envelope.requires_ack {
            if let Some(id) = envelope.id.clone() {
                self.bus.send_local(sender, ServerEvent::Ack { id });
            }
        }

        if let Err(e) = self.dispatch(sender, envelope.command).await {
            tracing::debug!(client = %sender, code = e.code(), "Command failed");
            self.bus.send_local(sender, ServerEvent::error_with_code(&e));
        }
    }

    /// Run the `leaveRoom` side effects for a vanished connection.
    pub async fn disconnect(&self, client_id: &ClientId) {
        if let Err(e) = self.leave_current_room(client_id).await {
            tracing::warn!(client = %client_id, error = %e, "Disconnect cleanup failed");
        }
        self.directory.forget_local(client_id);
        tracing::debug!(client = %client_id, "Session cleaned up");
    }

    /// Close a room on behalf of the lifecycle worker or the creator:
    /// notify every member, drop their records, delete the room.
    pub async fn close_room(&self, room_id: &str, reason: &str) -> Result<(), CommandError> {
        let room = self.rooms.load(room_id).await?;

        self.bus
            .broadcast_to(
                room_id,
                room.clients.clone(),
                ServerEvent::RoomClosed {
                    reason: reason.to_string(),
                },
            )
            .await?;

        for member in &room.clients {
            if let Err(e) = self.directory.unbind(member).await {
                tracing::warn!(client = %member, error = %e, "Failed to drop client record");
            }
        }
        self.rooms.delete(room_id).await?;
        tracing::info!(room = %room_id, reason = %reason, "Room closed");
        Ok(())
    }

    async fn dispatch(
        &self,
        sender: &ClientId,
        command: ClientCommand,
    ) -> Result<(), CommandError> {
        match command {
            ClientCommand::Ping => {
                self.bus.send_local(sender, ServerEvent::Pong);
                Ok(())
            }
            ClientCommand::CreateRoom { password } => self.create_room(sender, password).await,
            ClientCommand::JoinRoom { room_id, password } => {
                self.join_room(sender, &room_id, password.as_deref(), false)
                    .await
            }
            ClientCommand::RejoinRoom { room_id, password } => {
                self.join_room(sender, &room_id, password.as_deref(), true)
                    .await
            }
            ClientCommand::LeaveRoom => {
                self.current_room(sender).await?;
                self.leave_current_room(sender).await?;
                self.bus.send_local(sender, ServerEvent::LeftRoom);
                Ok(())
            }
            ClientCommand::CloseRoom => {
                let room_id = self.current_room(sender).await?;
                let room = self.rooms.load(&room_id).await?;
                if room.creator_id != *sender {
                    return Err(CommandError::NotCreatorOfRoom);
                }
                self.close_room(&room_id, "Room closed by creator").await
            }
            ClientCommand::SendMessage { content } => {
                let room_id = self.current_room(sender).await?;
                self.rooms.mutate(&room_id, |_| Ok(())).await?;
                self.bus
                    .broadcast(
                        &room_id,
                        ServerEvent::Message {
                            sender: sender.clone(),
                            content,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientCommand::AddVideo { video } => {
                let room_id = self.current_room(sender).await?;
                let room = self.rooms.load(&room_id).await?;
                if room.queue_contains(&video.id) {
                    return Err(CommandError::AlreadyInQueue);
                }
                self.require_embeddable(&video.id).await?;
                let room = self.rooms.mutate(&room_id, |r| r.add_video(video)).await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::AddVideoAndMoveToTop { video } => {
                let room_id = self.current_room(sender).await?;
                self.require_embeddable(&video.id).await?;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.add_video_to_top(video);
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::RemoveVideoFromQueue { video_id } => {
                let room_id = self.current_room(sender).await?;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.remove_from_queue(&video_id);
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::MoveToTop { video_id } => {
                let room_id = self.current_room(sender).await?;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| r.move_to_top(&video_id))
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::ShuffleQueue => {
                let room_id = self.current_room(sender).await?;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.shuffle_queue(&mut rand::thread_rng());
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::ClearQueue => {
                let room_id = self.current_room(sender).await?;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.clear_queue();
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::ClearHistory => {
                let room_id = self.current_room(sender).await?;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.clear_history();
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::PlayNow { video } => {
                let room_id = self.current_room(sender).await?;
                self.require_embeddable(&video.id).await?;
                let history_limit = self.config.history_limit;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.play_now(video, history_limit);
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::NextVideo | ClientCommand::VideoFinished => {
                let room_id = self.current_room(sender).await?;
                let history_limit = self.config.history_limit;
                let room = self
                    .rooms
                    .mutate(&room_id, |r| {
                        r.advance(history_limit);
                        Ok(())
                    })
                    .await?;
                self.broadcast_update(&room).await
            }
            ClientCommand::Play => {
                let room_id = self.current_room(sender).await?;
                self.rooms
                    .mutate(&room_id, |r| {
                        r.play();
                        Ok(())
                    })
                    .await?;
                self.bus.broadcast(&room_id, ServerEvent::Play).await?;
                Ok(())
            }
            ClientCommand::Pause => {
                let room_id = self.current_room(sender).await?;
                self.rooms
                    .mutate(&room_id, |r| {
                        r.pause();
                        Ok(())
                    })
                    .await?;
                self.bus.broadcast(&room_id, ServerEvent::Pause).await?;
                Ok(())
            }
            ClientCommand::Replay => {
                let room_id = self.current_room(sender).await?;
                self.rooms.mutate(&room_id, |r| r.replay()).await?;
                self.bus.broadcast(&room_id, ServerEvent::Replay).await?;
                Ok(())
            }
            ClientCommand::Seek { time } => {
                let room_id = self.current_room(sender).await?;
                let room = self.rooms.mutate(&room_id, |r| r.seek(time)).await?;
                self.bus
                    .broadcast(
                        &room_id,
                        ServerEvent::CurrentTimeChanged {
                            current_time: room.current_time,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientCommand::SetVolume { volume } => {
                let room_id = self.current_room(sender).await?;
                let room = self.rooms.mutate(&room_id, |r| r.set_volume(volume)).await?;
                self.bus
                    .broadcast(
                        &room_id,
                        ServerEvent::VolumeChanged {
                            volume: room.volume,
                        },
                    )
                    .await?;
                Ok(())
            }
            ClientCommand::ImportPlaylist { playlist } => {
                self.import_playlist(sender, &playlist).await
            }
        }
    }

    // ---- room membership -------------------------------------------------

    async fn current_room(&self, sender: &ClientId) -> Result<String, CommandError> {
        self.directory
            .room_of(sender)
            .await?
            .ok_or(CommandError::NotInRoom)
    }

    async fn create_room(
        &self,
        sender: &ClientId,
        password: Option<String>,
    ) -> Result<(), CommandError> {
        let stored_password = match password {
            Some(raw) => Some(self.encode_password(&raw)?),
            None => None,
        };

        let mut attempts = 0;
        let room_id = loop {
            let id = self.rooms.generate_id().await.map_err(CommandError::from)?;
            let room = Room::new(id.clone(), sender.clone(), stored_password.clone(), now_ms());
            match self.rooms.create(&room).await {
                Ok(()) => break id,
                Err(crate::room::RepositoryError::Conflict) if attempts < CREATE_RETRY_LIMIT => {
                    attempts += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.bus.send_local(
            sender,
            ServerEvent::RoomCreated {
                room_id: room_id.clone(),
            },
        );
        // The creator goes through the regular join path, password check
        // excepted since they just set it.
        self.join_known_room(sender, &room_id, false).await
    }

    async fn join_room(
        &self,
        sender: &ClientId,
        room_id: &str,
        password: Option<&str>,
        rejoin: bool,
    ) -> Result<(), CommandError> {
        let not_found = if rejoin {
            CommandError::RejoinRoomNotFound
        } else {
            CommandError::RoomNotFound
        };
        let room = self.rooms.load(room_id).await.map_err(|e| match e {
            crate::room::RepositoryError::NotFound => not_found.clone(),
            other => other.into(),
        })?;

        if let Some(stored) = &room.password {
            self.verify_password(password, stored)?;
        }

        self.join_known_room(sender, room_id, rejoin).await
    }

    async fn join_known_room(
        &self,
        sender: &ClientId,
        room_id: &str,
        rejoin: bool,
    ) -> Result<(), CommandError> {
        // One room at a time: quietly leave the current one first.
        if let Some(current) = self.directory.room_of(sender).await? {
            if current != room_id {
                self.leave_current_room(sender).await?;
            }
        }

        let member = sender.clone();
        let room = self
            .rooms
            .mutate(room_id, |r| {
                r.add_client(&member);
                Ok(())
            })
            .await
            .map_err(|e| match e {
                crate::room::RepositoryError::NotFound if rejoin => {
                    CommandError::RejoinRoomNotFound
                }
                other => other.into(),
            })?;

        self.directory.bind(sender, room_id).await?;
        self.bus.send_local(
            sender,
            ServerEvent::RoomJoined {
                your_id: sender.clone(),
                room: room.view_with_clients(),
            },
        );
        Ok(())
    }

    /// Remove `client_id` from whatever room it is in and drop its record.
    /// A no-op for unbound clients; the room record may already be gone.
    async fn leave_current_room(&self, client_id: &ClientId) -> Result<(), CommandError> {
        let Some(room_id) = self.directory.room_of(client_id).await? else {
            return Ok(());
        };

        let member = client_id.clone();
        match self
            .rooms
            .mutate(&room_id, |r| {
                r.remove_client(&member);
                Ok(())
            })
            .await
        {
            Ok(_) | Err(crate::room::RepositoryError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        self.directory.unbind(client_id).await?;
        Ok(())
    }

    // ---- playlist import -------------------------------------------------

    async fn import_playlist(
        &self,
        sender: &ClientId,
        reference: &str,
    ) -> Result<(), CommandError> {
        let room_id = self.current_room(sender).await?;

        let mut entries = tokio::time::timeout(
            self.config.probe_timeout,
            self.catalog.expand_playlist(reference),
        )
        .await
        .map_err(|_| {
            tracing::warn!(playlist = %reference, "Playlist expansion timed out");
            CommandError::Internal
        })?
        .map_err(|e| {
            tracing::error!(playlist = %reference, error = %e, "Playlist expansion failed");
            CommandError::Internal
        })?;
        entries.truncate(PLAYLIST_EXPANSION_LIMIT);

        let room = self.rooms.load(&room_id).await?;
        let mut seen: std::collections::HashSet<String> =
            room.video_queue.iter().map(|v| v.id.clone()).collect();

        // Filter in batches with a breather between them so one import does
        // not monopolize the catalog adapter.
        let mut survivors: Vec<Video> = Vec::new();
        let mut batches = entries.chunks(IMPORT_BATCH_SIZE).peekable();
        while let Some(batch) = batches.next() {
            for video in batch {
                if seen.contains(&video.id) {
                    continue;
                }
                if self.embed.is_embeddable(&video.id).await {
                    seen.insert(video.id.clone());
                    survivors.push(video.clone());
                }
            }
            if batches.peek().is_some() {
                tokio::time::sleep(IMPORT_BATCH_PAUSE).await;
            }
        }

        tracing::info!(
            room = %room_id,
            imported = survivors.len(),
            "Playlist import filtered"
        );

        let room = self
            .rooms
            .mutate(&room_id, |r| {
                r.import_videos(survivors);
                Ok(())
            })
            .await?;
        self.broadcast_update(&room).await
    }

    // ---- helpers ---------------------------------------------------------

    async fn broadcast_update(&self, room: &Room) -> Result<(), CommandError> {
        self.bus
            .broadcast(&room.id, ServerEvent::RoomUpdate { room: room.view() })
            .await?;
        Ok(())
    }

    async fn require_embeddable(&self, video_id: &str) -> Result<(), CommandError> {
        if self.embed.is_embeddable(video_id).await {
            Ok(())
        } else {
            Err(CommandError::VideoNotEmbeddable)
        }
    }

    fn encode_password(&self, raw: &str) -> Result<String, CommandError> {
        if self.config.encrypted_passwords {
            bcrypt::hash(raw, PASSWORD_HASH_COST).map_err(|e| {
                tracing::error!(error = %e, "Password hashing failed");
                CommandError::Internal
            })
        } else {
            Ok(raw.to_string())
        }
    }

    fn verify_password(
        &self,
        provided: Option<&str>,
        stored: &str,
    ) -> Result<(), CommandError> {
        let Some(provided) = provided else {
            return Err(CommandError::IncorrectPassword);
        };
        let matches = if self.config.encrypted_passwords {
            bcrypt::verify(provided, stored).unwrap_or(false)
        } else {
            provided == stored
        };
        if matches {
            Ok(())
        } else {
            Err(CommandError::IncorrectPassword)
        }
    }
}
