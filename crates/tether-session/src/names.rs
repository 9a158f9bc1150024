//! Display names for slots and items.

use std::collections::HashMap;

use tether_protocol::{GameData, ItemId, NetworkPlayer, SlotId};

/// Slot and item names, filled from server records.
///
/// Slot names come from the accept record and later room updates. Item
/// names come from the data package for this client's game.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    players: HashMap<SlotId, String>,
    items: HashMap<ItemId, String>,
    checksum: Option<String>,
}

impl NameRegistry {
    /// Records (or refreshes) the display name of every player listed.
    pub fn update_players(&mut self, players: &[NetworkPlayer]) {
        for player in players {
            self.players
                .insert(player.slot, player.display_name().to_string());
        }
    }

    pub fn player_name(&self, slot: SlotId) -> Option<&str> {
        self.players.get(&slot).map(String::as_str)
    }

    /// The slot's display name, or `"Slot <n>"` if unknown.
    pub fn player_display(&self, slot: SlotId) -> String {
        match self.player_name(slot) {
            Some(name) => name.to_string(),
            None => format!("Slot {}", slot.0),
        }
    }

    /// Replaces the item table with the one in `game`.
    pub fn load_game(&mut self, game: &GameData) {
        self.items = game
            .item_name_to_id
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        self.checksum = game.checksum.clone();
    }

    pub fn item_name(&self, item: ItemId) -> Option<&str> {
        self.items.get(&item).map(String::as_str)
    }

    /// The item's name, or `"Item <id>"` if unknown.
    pub fn item_display(&self, item: ItemId) -> String {
        match self.item_name(item) {
            Some(name) => name.to_string(),
            None => format!("Item {}", item.0),
        }
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Whether the item table should be (re)requested.
    ///
    /// True when no table is loaded, or the room advertises a checksum
    /// different from the loaded one.
    pub fn needs_data_package(&self, advertised: Option<&str>) -> bool {
        if self.items.is_empty() {
            return true;
        }
        match advertised {
            Some(checksum) => self.checksum.as_deref() != Some(checksum),
            None => false,
        }
    }
}
