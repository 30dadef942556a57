// Protocol constants for the signature pipeline

/// Path of the hash service version catalog, relative to the service base URL
pub const VERSION_CATALOG_PATH: &str = "/api/hash/versions";

/// Header carrying the hash service key
pub const AUTH_TOKEN_HEADER: &str = "X-AuthToken";

/// Fixed user agent sent to the hash service
pub const DEFAULT_USER_AGENT: &str = "pogobuf-signature";

/// Default client version when none is configured
pub const DEFAULT_CLIENT_VERSION: &str = "0.45";

/// Bare integer literals with at least this many digits are treated as 8-byte values
pub const LARGE_INTEGER_DIGITS: usize = 16;

/// Size of a freshly generated session hash
pub const SESSION_HASH_SIZE: usize = 16;

/// Response headers holding rate-limit metadata
pub const HEADER_AUTH_TOKEN: &str = "x-authtoken";
pub const HEADER_MAX_REQUEST_COUNT: &str = "x-maxrequestcount";
pub const HEADER_RATE_LIMIT_SECONDS: &str = "x-ratelimitseconds";
pub const HEADER_RATE_PERIOD_END: &str = "x-rateperiodend";
pub const HEADER_RATE_REQUESTS_REMAINING: &str = "x-raterequestsremaining";
pub const HEADER_AUTH_TOKEN_EXPIRATION: &str = "x-authtokenexpiration";

/// Tick period of the timer-driven generator
pub const FIX_TIMER_PERIOD_MS: u64 = 900;

/// Probability per tick of taking a fix while stationary
pub const STATIONARY_FIX_PROBABILITY: f64 = 0.15;

/// Probability of a deliberately broken ("junk") fix
pub const JUNK_FIX_PROBABILITY: f64 = 0.03;

/// Coordinate written into junk fixes
pub const JUNK_COORDINATE: f64 = 360.0;

/// Sentinel for course/speed when not reported
pub const NO_COURSE: f64 = -1.0;

/// Consumer-GPS horizontal accuracies; a random 66..80 value is drawn alongside these
pub const HORIZONTAL_ACCURACY_CANDIDATES: [f64; 11] = [5.0, 5.0, 5.0, 5.0, 10.0, 10.0, 10.0, 30.0, 30.0, 50.0, 65.0];

/// Vertical accuracy candidates when horizontal accuracy is in (10, 65)
pub const VERTICAL_ACCURACY_MEDIUM: [f64; 8] = [24.0, 32.0, 48.0, 48.0, 64.0, 64.0, 96.0, 128.0];

/// Vertical accuracy candidates when horizontal accuracy is 10 or better
pub const VERTICAL_ACCURACY_FINE: [f64; 7] = [3.0, 4.0, 6.0, 6.0, 8.0, 12.0, 24.0];

/// Magnetometer calibration states
pub const MAGNETIC_FIELD_ACCURACY_CANDIDATES: [i32; 7] = [-1, 1, 2, 2, 2, 2, 2];
