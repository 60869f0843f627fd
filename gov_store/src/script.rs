use parking_lot::RwLock;
use redis::ErrorKind;
use redis::FromRedisValue;
use redis::RedisResult;
use redis::aio::ConnectionManager;

/// Trim, count and conditionally add in one server-side step.
///
/// KEYS[1] counter key
/// ARGV[1] exclusive lower score bound, e.g. `(1760000000000000`
/// ARGV[2] limit
/// ARGV[3] claim timestamp (micros)
/// ARGV[4] unique member
/// ARGV[5] counter TTL in milliseconds
pub(crate) const CLAIM_SLOT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[3], ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[5])
    return 1
end
return 0
"#;

/// Script handle whose SHA is registered lazily and re-registered when the
/// server reports it evicted (`NOSCRIPT`)
pub(crate) struct CachedScript {
    source: &'static str,
    sha: RwLock<Option<String>>,
}

impl CachedScript {
    pub(crate) fn new(source: &'static str) -> Self {
        Self { source, sha: RwLock::new(None) }
    }

    pub(crate) async fn invoke<T: FromRedisValue>(&self, conn: &mut ConnectionManager, keys: &[&str], args: &[String]) -> RedisResult<T> {
        let cached = self.sha.read().clone();
        let sha = match cached {
            Some(sha) => sha,
            None => self.load(conn).await?,
        };

        match Self::eval_sha(conn, &sha, keys, args).await {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                tracing::debug!("Script {sha} evicted from store cache, reloading");
                self.sha.write().take();
                let sha = self.load(conn).await?;
                Self::eval_sha(conn, &sha, keys, args).await
            }
            other => other,
        }
    }

    async fn load(&self, conn: &mut ConnectionManager) -> RedisResult<String> {
        let sha: String = redis::cmd("SCRIPT").arg("LOAD").arg(self.source).query_async(conn).await?;
        *self.sha.write() = Some(sha.clone());
        Ok(sha)
    }

    async fn eval_sha<T: FromRedisValue>(conn: &mut ConnectionManager, sha: &str, keys: &[&str], args: &[String]) -> RedisResult<T> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(sha).arg(keys.len());
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(arg.as_str());
        }
        cmd.query_async(conn).await
    }

    #[cfg(test)]
    fn cached_sha(&self) -> Option<String> {
        self.sha.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_starts_unloaded() {
        let script = CachedScript::new(CLAIM_SLOT);
        assert!(script.cached_sha().is_none());
    }

    #[test]
    fn test_claim_script_touches_only_first_key() {
        assert!(CLAIM_SLOT.contains("KEYS[1]"));
        assert!(!CLAIM_SLOT.contains("KEYS[2]"));
    }
}
