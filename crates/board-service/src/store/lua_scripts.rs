//! Lua scripts for atomic hash maintenance in Redis.
//!
//! Hash fields cannot carry their own expiry, so the whole hash key is
//! refreshed on every field write and removed once its last field is deleted.
//! Running both steps in one script keeps a concurrent reader from observing
//! an empty-but-present hash or a field written without its TTL.

/// Lua script for a hash field write that refreshes the key TTL.
///
/// Arguments:
/// - KEYS[1]: Hash key (e.g., `room:{id}:recordings`)
/// - ARGV[1]: Field name
/// - ARGV[2]: Field value (JSON string)
/// - ARGV[3]: TTL in seconds (0 = leave expiry untouched)
///
/// Returns:
/// - 1: Field was created
/// - 0: Existing field was overwritten
pub const HSET_WITH_TTL: &str = r"
local created = redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])

local ttl = tonumber(ARGV[3])
if ttl ~= nil and ttl > 0 then
    redis.call('EXPIRE', KEYS[1], ttl)
end

return created
";

/// Lua script for a hash field claim that only writes a missing field.
///
/// Arguments:
/// - KEYS[1]: Hash key
/// - ARGV[1]: Field name
/// - ARGV[2]: Field value (JSON string)
/// - ARGV[3]: TTL in seconds (0 = leave expiry untouched)
///
/// Returns:
/// - 1: Field was created
/// - 0: Field already existed, nothing written
pub const HSETNX_WITH_TTL: &str = r"
local created = redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2])

local ttl = tonumber(ARGV[3])
if created == 1 and ttl ~= nil and ttl > 0 then
    redis.call('EXPIRE', KEYS[1], ttl)
end

return created
";

/// Lua script for a hash field delete that removes the key when empty.
///
/// Arguments:
/// - KEYS[1]: Hash key
/// - ARGV[1]: Field name
///
/// Returns:
/// - 1: Field was removed
/// - 0: Field did not exist
pub const HDEL_AND_CLEANUP: &str = r"
local removed = redis.call('HDEL', KEYS[1], ARGV[1])

if redis.call('HLEN', KEYS[1]) == 0 then
    redis.call('DEL', KEYS[1])
end

return removed
";
