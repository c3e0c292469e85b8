pub const SERVER_PORT: u16 = 3000;

pub const DEFAULT_ENERGY_MAX: u32 = 10;
pub const DEFAULT_ENERGY_REGEN_PER_HOUR: u32 = 10;
pub const MS_PER_HOUR: i64 = 3_600_000;

pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 60;

// percentile bands for the soft badge tracks; 45..=55 counts toward neither
pub const MAJORITY_ABOVE_PCT: f64 = 55.0;
pub const MINORITY_BELOW_PCT: f64 = 45.0;

pub const TRENDSETTER_BADGE: &str = "trendsetter";
pub const TRENDSETTER_PROGRESS: &str = "trendsetter_progress";
pub const BOLD_MOVE_BADGE: &str = "bold_move";
pub const BOLD_MOVE_PROGRESS: &str = "bold_move_progress";

pub const BADGE_SOURCE_ACHIEVEMENT: &str = "achievement";

// BACKEND REST SURFACE
pub const REST_PREFIX: &str = "/rest/v1";
pub const AUTH_USER_PATH: &str = "/auth/v1/user";
pub const TABLE_ACHIEVEMENTS: &str = "achievements";
pub const TABLE_BADGES: &str = "badges";
pub const TABLE_VOTES: &str = "votes";
pub const TABLE_FRIENDSHIPS: &str = "friendships";
pub const TABLE_PROFILES: &str = "profiles";
pub const FRIENDSHIP_ACCEPTED: &str = "accepted";

pub const API_KEY_HEADER: &str = "apikey";
pub const PREFER_HEADER: &str = "Prefer";
pub const PREFER_REPRESENTATION: &str = "return=representation";

// COOKIE REWRITING
pub const SECURE_COOKIE_PREFIX: &str = "__Secure-";
pub const HOST_COOKIE_PREFIX: &str = "__Host-";
pub const PROXY_ROUTE_PREFIX: &str = "/backend";
