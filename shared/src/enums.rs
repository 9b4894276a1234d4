//! Numeric wire enums.
//!
//! The protocol keeps growing, so every enum here is open: values this build
//! doesn't recognise decode to `Unknown(raw)` and re-encode unchanged. Only
//! higher layers decide whether an unknown value is acceptable.

use serde::{Deserialize, Serialize};

macro_rules! open_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $repr:ty {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )*
            Unknown($repr),
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                match value {
                    $( $value => Self::$variant, )*
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )*
                    $name::Unknown(other) => other,
                }
            }
        }

        impl $name {
            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Unknown(_))
            }
        }
    };
}

open_enum! {
    /// Top-level payload tag inside Reliable/Unreliable packets.
    pub enum RootMessageTag: u8 {
        HostGame = 0,
        JoinGame = 1,
        StartGame = 2,
        RemoveGame = 3,
        RemovePlayer = 4,
        GameData = 5,
        GameDataTo = 6,
        JoinedGame = 7,
        EndGame = 8,
        AlterGame = 10,
        KickPlayer = 11,
        WaitForHost = 12,
        Redirect = 13,
        ReselectServer = 14,
        GetGameList = 16,
    }
}

open_enum! {
    pub enum GameDataTag: u8 {
        Data = 1,
        Rpc = 2,
        Spawn = 4,
        Despawn = 5,
        SceneChange = 6,
        Ready = 7,
        ClientInfo = 205,
    }
}

open_enum! {
    pub enum RpcTag: u8 {
        PlayAnimation = 0,
        CompleteTask = 1,
        SyncSettings = 2,
        SetInfected = 3,
        Exiled = 4,
        CheckName = 5,
        SetName = 6,
        CheckColor = 7,
        SetColor = 8,
        SetHat = 9,
        SetSkin = 10,
        ReportDeadBody = 11,
        MurderPlayer = 12,
        SendChat = 13,
        StartMeeting = 14,
        SetScanner = 15,
        SendChatNote = 16,
        SetPet = 17,
        SetStartCounter = 18,
        EnterVent = 19,
        ExitVent = 20,
        SnapTo = 21,
        Close = 22,
        VotingComplete = 23,
        CastVote = 24,
        ClearVote = 25,
        AddVote = 26,
        CloseDoorsOfType = 27,
        RepairSystem = 28,
        SetTasks = 29,
        ClimbLadder = 30,
        UsePlatform = 31,
    }
}

open_enum! {
    /// Prefab kind declared by a Spawn message.
    pub enum SpawnType: u32 {
        ShipStatus = 0,
        MeetingHud = 1,
        LobbyBehaviour = 2,
        GameData = 3,
        Player = 4,
        HeadQuarters = 5,
        PlanetMap = 6,
        AprilShipStatus = 7,
        Airship = 8,
    }
}

open_enum! {
    pub enum SystemType: u8 {
        Hallway = 0,
        Storage = 1,
        Cafeteria = 2,
        Reactor = 3,
        UpperEngine = 4,
        Nav = 5,
        Admin = 6,
        Electrical = 7,
        LifeSupp = 8,
        Shields = 9,
        MedBay = 10,
        Security = 11,
        Weapons = 12,
        LowerEngine = 13,
        Comms = 14,
        ShipTasks = 15,
        Doors = 16,
        Sabotage = 17,
        Decontamination = 18,
        Launchpad = 19,
        LockerRoom = 20,
        Laboratory = 21,
        Balcony = 22,
        Office = 23,
        Greenhouse = 24,
        Dropship = 25,
        Decontamination2 = 26,
        Outside = 27,
        Specimens = 28,
        BoilerRoom = 29,
        VaultRoom = 30,
        Cockpit = 31,
        Armory = 32,
        Kitchen = 33,
        ViewingDeck = 34,
        HallOfPortraits = 35,
        CargoBay = 36,
        Ventilation = 37,
        Showers = 38,
        Engine = 39,
        Brig = 40,
        MeetingRoom = 41,
        Records = 42,
        Lounge = 43,
        GapRoom = 44,
        MainHall = 45,
        Medical = 46,
    }
}

open_enum! {
    pub enum DisconnectReason: u8 {
        ExitGame = 0,
        GameFull = 1,
        GameStarted = 2,
        GameNotFound = 3,
        IncorrectVersion = 5,
        Banned = 6,
        Kicked = 7,
        Custom = 8,
        InvalidName = 9,
        Hacking = 10,
        NotAuthorized = 11,
        Destroy = 16,
        Error = 17,
        IncorrectGame = 18,
        ServerRequest = 19,
        ServerFull = 20,
        InternalPlayerMissing = 100,
        InternalNonceFailure = 101,
        InternalConnectionToken = 102,
        PlatformLock = 103,
        LobbyInactivity = 104,
        MatchmakerInactivity = 105,
        InvalidGameOptions = 106,
        NoServersAvailable = 107,
        TooManyGames = 109,
        FocusLostBackground = 207,
        IntentionalLeaving = 208,
        FocusLost = 209,
        NewConnection = 210,
    }
}

impl DisconnectReason {
    /// User-facing text for the reason.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ExitGame => "You left the game.",
            Self::GameFull => "The game you tried to join is full.",
            Self::GameStarted => "The game you tried to join already started.",
            Self::GameNotFound => "Could not find the game you're looking for.",
            Self::IncorrectVersion => "You are running an older version of the game. Please update.",
            Self::Banned => "You were banned from the room. You cannot rejoin that room.",
            Self::Kicked => "You were kicked from the room. You can rejoin if the room hasn't started.",
            Self::Custom => "You were disconnected by the server.",
            Self::InvalidName => "Your name is not allowed.",
            Self::Hacking => "You were banned for hacking.",
            Self::NotAuthorized => "Authentication with the server failed.",
            Self::Destroy => "The room was destroyed.",
            Self::Error => "You disconnected from the server due to an error.",
            Self::IncorrectGame => "The server stopped this game. Possibly due to a connection issue.",
            Self::ServerRequest => "The server closed the room.",
            Self::ServerFull => "The server is full. Try again later.",
            Self::InternalPlayerMissing => "Your player is missing from the room.",
            Self::InternalNonceFailure => "Internal nonce failure.",
            Self::InternalConnectionToken => "Internal connection token failure.",
            Self::PlatformLock => "This room is locked to a different platform.",
            Self::LobbyInactivity => "The lobby closed due to inactivity.",
            Self::MatchmakerInactivity => "The matchmaker closed the connection due to inactivity.",
            Self::InvalidGameOptions => "The game options are invalid.",
            Self::NoServersAvailable => "No servers are available.",
            Self::TooManyGames => "Too many games were created. Try again later.",
            Self::FocusLostBackground => "You lost focus of the game while it was in the background.",
            Self::IntentionalLeaving => "You were banned for leaving games intentionally.",
            Self::FocusLost => "You lost focus of the game.",
            Self::NewConnection => "You connected from another device.",
            Self::Unknown(_) => "You disconnected for an unknown reason.",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self, self.message())
    }
}

open_enum! {
    pub enum GameOverReason: u8 {
        HumansByVote = 0,
        HumansByTask = 1,
        ImpostorByVote = 2,
        ImpostorByKill = 3,
        ImpostorBySabotage = 4,
        ImpostorDisconnect = 5,
        HumansDisconnect = 6,
    }
}

open_enum! {
    pub enum GameMap: u8 {
        TheSkeld = 0,
        MiraHq = 1,
        Polus = 2,
        AprilSkeld = 3,
        Airship = 4,
    }
}

impl GameMap {
    /// The ShipStatus prefab spawned for this map.
    pub fn ship_spawn_type(&self) -> SpawnType {
        match self {
            Self::MiraHq => SpawnType::HeadQuarters,
            Self::Polus => SpawnType::PlanetMap,
            Self::AprilSkeld => SpawnType::AprilShipStatus,
            Self::Airship => SpawnType::Airship,
            Self::TheSkeld | Self::Unknown(_) => SpawnType::ShipStatus,
        }
    }
}

open_enum! {
    /// Minigame kind of a task. Several tasks on one map can share a type.
    pub enum TaskType: u8 {
        SubmitScan = 0,
        PrimeShields = 1,
        FuelEngines = 2,
        ChartCourse = 3,
        StartReactor = 4,
        SwipeCard = 5,
        ClearAsteroids = 6,
        UploadData = 7,
        InspectSample = 8,
        EmptyChute = 9,
        EmptyGarbage = 10,
        AlignEngineOutput = 11,
        FixWiring = 12,
        CalibrateDistributor = 13,
        DivertPower = 14,
        UnlockManifolds = 15,
        ResetReactor = 16,
        FixLights = 17,
        CleanO2Filter = 18,
        FixComms = 19,
        RestoreOxy = 20,
        StabilizeSteering = 21,
    }
}

open_enum! {
    pub enum AlterGameTag: u8 {
        ChangePrivacy = 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values_map_both_ways() {
        assert_eq!(RpcTag::from(28), RpcTag::RepairSystem);
        assert_eq!(u8::from(RpcTag::RepairSystem), 28);
        assert_eq!(SpawnType::from(4u32), SpawnType::Player);
        assert_eq!(u8::from(GameDataTag::ClientInfo), 205);
    }

    #[test]
    fn test_unknown_values_survive() {
        let tag = RootMessageTag::from(99);
        assert_eq!(tag, RootMessageTag::Unknown(99));
        assert!(!tag.is_known());
        assert_eq!(u8::from(tag), 99);
    }

    #[test]
    fn test_every_disconnect_reason_has_text() {
        for raw in 0..=u8::MAX {
            assert!(!DisconnectReason::from(raw).message().is_empty());
        }
    }

    #[test]
    fn test_map_prefabs() {
        assert_eq!(GameMap::Polus.ship_spawn_type(), SpawnType::PlanetMap);
        assert_eq!(GameMap::Unknown(9).ship_spawn_type(), SpawnType::ShipStatus);
    }
}
