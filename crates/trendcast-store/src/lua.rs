//! Server-side scripts run by [`RedisStore`](crate::RedisStore).
//!
//! Stats entries are JSON objects stored as hash field values:
//! `{"totalSentiment":N,"mentionCount":N,"timestamp":N}`.

/// Merge one observation into its theme's stats.
///
/// KEYS[1] stats hash, KEYS[2] (optional) dedup marker for the observation id.
/// ARGV[1] theme, ARGV[2] score, ARGV[3] observed-at seconds, ARGV[4] dedup TTL.
///
/// The stats hash is read before the dedup marker is written, so a wrong-typed
/// stats key fails the script without consuming the observation id.
///
/// Returns the new mention count, or -1 when the observation id was already
/// merged. An existing entry that is undecodable or has a negative mention
/// count is replaced by a fresh one.
pub(crate) const MERGE: &str = r"
local raw = redis.call('HGET', KEYS[1], ARGV[1])

if #KEYS > 1 then
  if not redis.call('SET', KEYS[2], '1', 'NX', 'EX', tonumber(ARGV[4])) then
    return -1
  end
end

local total, count, ts = 0, 0, 0
if raw then
  local ok, stats = pcall(cjson.decode, raw)
  if ok and type(stats) == 'table' then
    local t = tonumber(stats.totalSentiment)
    local c = tonumber(stats.mentionCount)
    local s = tonumber(stats.timestamp)
    if t and c and s and c >= 0 then
      total, count, ts = t, c, s
    end
  end
end

local observed = tonumber(ARGV[3])
total = total + tonumber(ARGV[2])
count = count + 1
if observed > ts then
  ts = observed
end

redis.call('HSET', KEYS[1], ARGV[1],
  cjson.encode({totalSentiment = total, mentionCount = count, timestamp = ts}))
return count
";

/// Evict expired themes and rebuild the ranked set.
///
/// KEYS[1] stats hash, KEYS[2] live ranked set, KEYS[3] staging set.
/// ARGV[1] now, ARGV[2] `tumbling` or `session`, ARGV[3] window span seconds.
///
/// Active themes are staged first and swapped in with RENAME, so the live
/// set is replaced in one step. Returns
/// `{processed, ranked, evicted, {malformed themes...}}`.
pub(crate) const REBUILD: &str = r"
local now = tonumber(ARGV[1])
local span = tonumber(ARGV[3])
local tumbling = ARGV[2] == 'tumbling'

redis.call('DEL', KEYS[3])

local themes = redis.call('HKEYS', KEYS[1])
local ranked, evicted = 0, 0
local malformed = {}

for _, theme in ipairs(themes) do
  local raw = redis.call('HGET', KEYS[1], theme)
  local ok, stats = pcall(cjson.decode, raw or '')
  local ts, count
  if ok and type(stats) == 'table' and tonumber(stats.totalSentiment) then
    ts = tonumber(stats.timestamp)
    count = tonumber(stats.mentionCount)
  end
  if ts == nil or count == nil or count < 0 then
    table.insert(malformed, theme)
  else
    local active
    if tumbling then
      active = ts + span >= now
    else
      active = now - ts <= span
    end
    if active then
      if count > 0 then
        redis.call('ZADD', KEYS[3], count, theme)
        ranked = ranked + 1
      end
    else
      redis.call('HDEL', KEYS[1], theme)
      evicted = evicted + 1
    end
  end
end

if ranked > 0 then
  redis.call('RENAME', KEYS[3], KEYS[2])
else
  redis.call('DEL', KEYS[2])
end

return {#themes, ranked, evicted, malformed}
";
