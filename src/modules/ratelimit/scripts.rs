//! Server-side atomic scripts for counter mutation.
//!
//! These scripts are the single point of truth for rate-limit state; no
//! client-side read-modify-write ever touches a counter key. Each script
//! returns `{allowed, remaining, reset_at}` where `reset_at` is the
//! earliest epoch second at which a subsequent call is guaranteed to
//! succeed given zero further traffic.

use redis::Script;

/// Sliding window over a sorted set.
///
/// Members are `seed:index` strings (the seed carries a nanosecond
/// timestamp and random suffix, so duplicates within the same second stay
/// distinct); scores are whole epoch seconds. Entries older than the
/// window are dropped before counting.
///
/// KEYS[1] counter key, ARGV: now, window, limit, cost, seed
pub fn sliding_window() -> Script {
    Script::new(
        r#"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])
        local cost = tonumber(ARGV[4])
        local seed = ARGV[5]

        redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
        local current = redis.call('ZCARD', key)

        if current + cost <= limit then
            for i = 1, cost do
                redis.call('ZADD', key, now, seed .. ':' .. i)
            end
            redis.call('EXPIRE', key, window)
            local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
            local reset = now + window
            if oldest[2] then
                reset = tonumber(oldest[2]) + window
            end
            return {1, limit - current - cost, reset}
        else
            local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
            local reset = now + window
            if oldest[2] then
                reset = tonumber(oldest[2]) + window
            end
            return {0, 0, reset}
        end
        "#,
    )
}

/// Fixed window counter. The caller aligns the key to the window start
/// (`rl:fw:{key}:{epoch}`), so the count resets exactly once per boundary.
/// The counter increments even on denial; remaining is clamped at zero.
///
/// KEYS[1] counter key, ARGV: window, limit, cost, window_start
pub fn fixed_window() -> Script {
    Script::new(
        r#"
        local key = KEYS[1]
        local window = tonumber(ARGV[1])
        local limit = tonumber(ARGV[2])
        local cost = tonumber(ARGV[3])
        local window_start = tonumber(ARGV[4])

        local count = redis.call('INCRBY', key, cost)
        if count == cost then
            redis.call('EXPIRE', key, window)
        end

        local reset = window_start + window
        if count <= limit then
            return {1, limit - count, reset}
        else
            return {0, 0, reset}
        end
        "#,
    )
}

/// Token bucket over a hash with `tokens` and `last_refill` fields.
/// Refill is quantized to whole refill periods; `last_refill` advances by
/// the consumed periods so fractional progress is never lost. TTL is twice
/// the refill period.
///
/// KEYS[1] counter key, ARGV: now, capacity, refill_rate, refill_period, cost
pub fn token_bucket() -> Script {
    Script::new(
        r#"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local capacity = tonumber(ARGV[2])
        local refill_rate = tonumber(ARGV[3])
        local refill_period = tonumber(ARGV[4])
        local cost = tonumber(ARGV[5])

        local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
        local tokens = tonumber(bucket[1])
        local last_refill = tonumber(bucket[2])
        if tokens == nil or last_refill == nil then
            tokens = capacity
            last_refill = now
        end

        local intervals = math.floor((now - last_refill) / refill_period)
        if intervals > 0 then
            tokens = math.min(capacity, tokens + intervals * refill_rate)
            last_refill = last_refill + intervals * refill_period
        end

        local allowed = 0
        if tokens >= cost then
            tokens = tokens - cost
            allowed = 1
        end

        redis.call('HMSET', key, 'tokens', tokens, 'last_refill', last_refill)
        redis.call('EXPIRE', key, refill_period * 2)

        local reset
        if tokens >= cost then
            reset = now
        else
            reset = last_refill + math.ceil((cost - tokens) / refill_rate) * refill_period
        end

        return {allowed, math.floor(tokens), reset}
        "#,
    )
}
