use serde::{Deserialize, Serialize};

/// One client in the room, as the room engine tracks it.
///
/// Game-facing details (name, colour, role, tasks) live in the
/// [`PlayerRegistry`](super::gamedata::PlayerRegistry) and are keyed by
/// `player_id`, which only exists once the player's character has spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub client_id: i32,
    pub player_id: Option<u8>,
    pub control_net_id: Option<u32>,
    pub physics_net_id: Option<u32>,
    pub transform_net_id: Option<u32>,
    pub scene: Option<String>,
    pub ready: bool,
}

impl Player {
    pub fn new(client_id: i32) -> Self {
        Self {
            client_id,
            player_id: None,
            control_net_id: None,
            physics_net_id: None,
            transform_net_id: None,
            scene: None,
            ready: false,
        }
    }

    pub fn has_character(&self) -> bool {
        self.control_net_id.is_some()
    }

    /// Forgets the character, e.g. after its objects despawn.
    pub fn clear_character(&mut self) {
        self.player_id = None;
        self.control_net_id = None;
        self.physics_net_id = None;
        self.transform_net_id = None;
    }

    pub fn owns_net_id(&self, net_id: u32) -> bool {
        [self.control_net_id, self.physics_net_id, self.transform_net_id].contains(&Some(net_id))
    }
}
