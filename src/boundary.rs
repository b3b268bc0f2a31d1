//! The surface a request handler calls
//!
//! [`Sealer`] runs every request through the same pipeline: validate the
//! inputs, charge the caller's rate window, derive the key under a
//! deadline, then encrypt or decrypt. Failures come back as
//! [`SealnoteError`]s whose `public_message()` is safe to return verbatim.

use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::envelope;
use crate::error::{ErrorCategory, ErrorKind, Result, SealnoteError};
use crate::kdf::{self, DerivedKey};
use crate::ratelimit::{Clock, RateLimiter, SystemClock};
use crate::validate::{ValueContext, check_all};

pub struct Sealer<C = SystemClock> {
    config: Config,
    limiter: Arc<RateLimiter<C>>,
}

impl Sealer<SystemClock> {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Sealer<C> {
    pub fn with_clock(config: Config, clock: C) -> Result<Self> {
        config.validate()?;
        let limiter = RateLimiter::with_clock(config.rate_limit()?, clock);
        Ok(Self {
            config,
            limiter: Arc::new(limiter),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the limiter, e.g. for `ratelimit::spawn_sweeper`.
    pub fn limiter(&self) -> &Arc<RateLimiter<C>> {
        &self.limiter
    }

    /// Seal `message` under `passphrase` on behalf of `identity`.
    pub async fn seal(&self, identity: &str, message: &str, passphrase: &str) -> Result<String> {
        check_all(ValueContext::Identity, identity).into_result("identity")?;
        check_all(ValueContext::Message, message).into_result("message")?;
        check_all(ValueContext::Passphrase, passphrase).into_result("passphrase")?;
        self.admit(identity)?;

        let key = self.derive(passphrase).await?;
        envelope::encrypt(message.as_bytes(), &key)
    }

    /// Open a payload produced by [`Sealer::seal`].
    ///
    /// Surrounding whitespace is ignored, since payloads are often pasted.
    /// A malformed payload, a wrong passphrase and a tampered envelope all
    /// produce the same `CryptoFailed` error.
    pub async fn open(&self, identity: &str, payload: &str, passphrase: &str) -> Result<String> {
        let payload = payload.trim();
        check_all(ValueContext::Identity, identity).into_result("identity")?;
        check_all(ValueContext::Payload, payload).into_result("payload")?;
        check_all(ValueContext::Passphrase, passphrase).into_result("passphrase")?;
        self.admit(identity)?;

        // Frame errors surface before paying for a derivation.
        let framed = envelope::unframe(payload).map_err(undifferentiated)?;
        let key = self.derive(passphrase).await?;
        let plaintext = envelope::open_envelope(&framed, &key).map_err(undifferentiated)?;

        String::from_utf8(plaintext).map_err(|_| {
            debug!("opened envelope is not UTF-8");
            SealnoteError::crypto()
        })
    }

    /// Derive a site password for `label` on behalf of `identity`.
    pub async fn site_password(
        &self,
        identity: &str,
        master: &str,
        label: &str,
        length: usize,
    ) -> Result<Zeroizing<String>> {
        check_all(ValueContext::Identity, identity).into_result("identity")?;
        check_all(ValueContext::Passphrase, master).into_result("master passphrase")?;
        check_all(ValueContext::Label, label).into_result("label")?;
        self.admit(identity)?;

        let master = Zeroizing::new(master.as_bytes().to_vec());
        let label = label.to_owned();
        let salt = self.config.salt;
        let task = tokio::task::spawn_blocking(move || {
            kdf::derive_site_password(&master, &label, &salt, length)
        });

        match tokio::time::timeout(self.config.derive_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SealnoteError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "site password task failed",
                e,
            )),
            Err(e) => Err(SealnoteError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::DerivationTimeout,
                format!("site password derivation exceeded {:?}", self.config.derive_timeout),
                e,
            )),
        }
    }

    fn admit(&self, identity: &str) -> Result<()> {
        let decision = self.limiter.check(identity);
        if decision.allowed {
            debug!(remaining = decision.remaining, "request admitted");
            Ok(())
        } else {
            Err(SealnoteError::rate_limited(decision.reset_at))
        }
    }

    async fn derive(&self, passphrase: &str) -> Result<DerivedKey> {
        let passphrase = Zeroizing::new(passphrase.as_bytes().to_vec());
        kdf::derive_with_timeout(passphrase, self.config.salt, self.config.derive_timeout).await
    }
}

fn undifferentiated(err: SealnoteError) -> SealnoteError {
    if err.kind == Some(ErrorKind::DecodeFailed) {
        debug!(error = %err, "payload failed to decode");
        SealnoteError::crypto()
    } else {
        err
    }
}
