//! Inbound record dispatch.
//!
//! Every decoded [`ServerRecord`] lands in [`ProtocolEngine::dispatch`],
//! which matches it exhaustively. Each handler first checks that the
//! record is expected in the current phase; anything out of phase is
//! logged at debug level and ignored.

use tether_protocol::{
    ClientRecord, Codec, Connected, DataPackageObject, JsonMessagePart, NetworkItem,
    RoomInfo, RoomUpdate, ServerRecord,
};
use tether_session::{DeathNotice, SlotConfig, SlotIdentity, DEATH_LINK_TAG};
use tether_transport::Transport;

use serde_json::{Map, Value};

use crate::engine::{Phase, ProtocolEngine};
use crate::events::{ChatMessage, DataResponse, DisconnectReason, ReceivedItem};
use crate::ClientError;

impl<T: Transport, C: Codec> ProtocolEngine<T, C> {
    /// Routes one inbound record.
    ///
    /// Only a refusal produces an error.
    pub(crate) fn dispatch(&mut self, record: ServerRecord) -> Result<(), ClientError> {
        match record {
            ServerRecord::RoomInfo(info) => self.handle_room_info(info),
            ServerRecord::ConnectionRefused { errors } => return self.handle_refused(errors),
            ServerRecord::Connected(accepted) => self.handle_connected(accepted),
            ServerRecord::ReceivedItems { index, items } => {
                self.handle_received_items(index, items)
            }
            ServerRecord::RoomUpdate(update) => self.handle_room_update(update),
            ServerRecord::PrintJson { data, kind } => self.handle_print(data, kind),
            ServerRecord::DataPackage { data } => self.handle_data_package(data),
            ServerRecord::Bounced { tags, data, .. } => self.handle_bounced(&tags, &data),
            ServerRecord::Retrieved { keys, request_id } => {
                self.handle_retrieved(keys, request_id)
            }
            ServerRecord::InvalidPacket {
                kind,
                original_cmd,
                text,
            } => {
                tracing::warn!(
                    %kind,
                    original_cmd = original_cmd.as_deref().unwrap_or("?"),
                    %text,
                    "server rejected a record"
                );
            }
            ServerRecord::Unknown => {
                tracing::debug!("ignoring unknown record type");
            }
        }
        Ok(())
    }

    /// Logs and returns `false` unless the engine is in one of `allowed`.
    fn expect_phase(&self, allowed: &[Phase], cmd: &str) -> bool {
        if allowed.contains(&self.phase) {
            true
        } else {
            tracing::debug!(%cmd, phase = %self.phase, "ignoring out-of-phase record");
            false
        }
    }

    // -- Handshake ----------------------------------------------------------

    fn handle_room_info(&mut self, info: RoomInfo) {
        if !self.expect_phase(&[Phase::AwaitingRoomInfo], "RoomInfo") {
            return;
        }

        let game = self.config.game.clone();
        let advertised = info.datapackage_checksums.get(&game).map(String::as_str);
        if self.session.names.needs_data_package(advertised) {
            tracing::debug!(%game, "requesting data package");
            self.send(&ClientRecord::GetDataPackage {
                games: vec![game.clone()],
            });
        }

        let Some(target) = self.session.info.clone() else {
            return;
        };
        let death_link = self.session.death_link.is_enabled();
        let connect = ClientRecord::Connect {
            password: target.password,
            game,
            name: target.slot_name,
            uuid: self.session.client_uuid.clone(),
            version: self.session.version.clone(),
            items_handling: self.config.items_handling,
            tags: self.config.capability_tags(death_link),
            slot_data: true,
        };
        self.send(&connect);
        self.announced_death_link = death_link;
        self.phase = Phase::AwaitingAuthResult;
        tracing::info!(seed = %info.seed_name, "room info received, authenticating");
    }

    fn handle_refused(&mut self, errors: Vec<String>) -> Result<(), ClientError> {
        if !self.expect_phase(&[Phase::AwaitingAuthResult], "ConnectionRefused") {
            return Ok(());
        }

        tracing::warn!(?errors, "authentication refused");
        self.transport.close();
        self.phase = Phase::Disconnected;
        self.reconnect.disarm();
        self.pending_fetches.clear();
        self.events
            .disconnected(&DisconnectReason::Refused(errors.clone()));

        Err(ClientError::AuthenticationRefused { errors })
    }

    fn handle_connected(&mut self, accepted: Connected) {
        if !self.expect_phase(&[Phase::AwaitingAuthResult], "Connected") {
            return;
        }

        let session = &mut self.session;
        session.identity = Some(SlotIdentity {
            team: accepted.team,
            slot: accepted.slot,
        });
        session.names.update_players(&accepted.players);
        session.slot_config = SlotConfig::new(accepted.slot_data.unwrap_or_default());
        let unconfirmed = session
            .ledger
            .seed_from_server(&accepted.checked_locations);

        self.phase = Phase::Authenticated;
        self.reconnect.reset();
        tracing::info!(
            team = accepted.team,
            slot = %accepted.slot,
            checked = self.session.ledger.checked_count(),
            resend = unconfirmed.len(),
            "authenticated"
        );

        // Death link toggled after the authentication record left.
        if self.session.death_link.is_enabled() != self.announced_death_link {
            self.send_capabilities();
        }
        if !unconfirmed.is_empty() {
            self.send(&ClientRecord::LocationChecks {
                locations: unconfirmed,
            });
        }
        self.send(&ClientRecord::Sync);
        if self.session.goal_reached && !self.goal_sent {
            self.send_goal_status();
        }

        self.events.connected(&self.session.slot_config);
    }

    // -- Authenticated traffic ---------------------------------------------

    fn handle_received_items(&mut self, index: u64, items: Vec<NetworkItem>) {
        if !self.expect_phase(&[Phase::Authenticated], "ReceivedItems") {
            return;
        }

        let cursor = self.session.ledger.next_item_index();
        if index > cursor {
            tracing::warn!(index, cursor, "item batch leaves a gap, requesting resync");
            self.send(&ClientRecord::Sync);
            return;
        }

        for (offset, item) in items.into_iter().enumerate() {
            let absolute = index + offset as u64;
            if self.session.ledger.is_stale(absolute) {
                tracing::trace!(index = absolute, "skipping redelivered item");
                continue;
            }

            let names = &self.session.names;
            let received = ReceivedItem {
                index: absolute,
                item: item.item,
                item_name: names.item_display(item.item),
                location: item.location,
                sender: item.player,
                sender_name: names.player_display(item.player),
                flags: item.flags,
            };
            tracing::debug!(index = absolute, item = %received.item, "item received");

            self.events.item_received(&received);
            self.session.ledger.advance_past(absolute);
        }
    }

    fn handle_room_update(&mut self, update: RoomUpdate) {
        if !self.expect_phase(&[Phase::Authenticated], "RoomUpdate") {
            return;
        }
        self.session.ledger.merge_confirmed(&update.checked_locations);
        if let Some(players) = update.players {
            self.session.names.update_players(&players);
        }
    }

    fn handle_print(&mut self, parts: Vec<JsonMessagePart>, kind: Option<String>) {
        if !self.expect_phase(&[Phase::Authenticated], "PrintJSON") {
            return;
        }
        let text: String = parts.iter().map(|part| part.text.as_str()).collect();
        self.events.chat(&ChatMessage { text, kind, parts });
    }

    fn handle_data_package(&mut self, data: DataPackageObject) {
        if !self.expect_phase(
            &[Phase::AwaitingAuthResult, Phase::Authenticated],
            "DataPackage",
        ) {
            return;
        }
        match data.games.get(&self.config.game) {
            Some(game) => {
                self.session.names.load_game(game);
                tracing::debug!(
                    items = game.item_name_to_id.len(),
                    checksum = game.checksum.as_deref().unwrap_or(""),
                    "data package loaded"
                );
            }
            None => tracing::debug!(game = %self.config.game, "data package lacks this game"),
        }
    }

    fn handle_bounced(&mut self, tags: &[String], data: &Value) {
        if !self.expect_phase(&[Phase::Authenticated], "Bounced") {
            return;
        }
        if !tags.iter().any(|tag| tag == DEATH_LINK_TAG) {
            tracing::debug!(?tags, "ignoring bounce");
            return;
        }
        let Some(notice) = DeathNotice::from_data(data) else {
            tracing::warn!("dropping malformed death link payload");
            return;
        };
        if !self.session.death_link.should_deliver(notice.time) {
            tracing::debug!(time = ?notice.time, "death link suppressed");
            return;
        }

        tracing::info!(source = %notice.source, cause = %notice.cause, "death link received");
        self.events.death_link(&notice.source, &notice.cause);
    }

    fn handle_retrieved(&mut self, keys: Map<String, Value>, request_id: Option<u64>) {
        if !self.expect_phase(&[Phase::Authenticated], "Retrieved") {
            return;
        }
        match request_id {
            Some(id) if self.pending_fetches.remove(&id) => {
                self.events.data_retrieved(&DataResponse {
                    request_id: id,
                    keys,
                });
            }
            Some(id) => tracing::debug!(request_id = id, "ignoring reply to unknown request"),
            None => tracing::debug!("ignoring reply without request id"),
        }
    }
}
