//! Gamepass verification protocol.
//!
//! Proves, without platform credentials, that the customer created a
//! for-sale gamepass priced exactly at the marketplace-markup price.
//! A successful verification is handed back to the caller as a
//! signed, TTL-bound ticket; the ticket is bound to the required
//! price at issue time so a later amount change invalidates it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// A marketplace listing under consideration. Ephemeral: used only
/// for the verification decision, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GamepassCandidate {
    pub id: i64,
    pub name: String,
    pub price: Option<i64>,
    pub is_for_sale: bool,
    pub creator_name: String,
}

/// Public marketplace URL for a gamepass.
pub fn gamepass_url(gamepass_id: i64) -> String {
    format!("https://www.roblox.com/game-pass/{}", gamepass_id)
}

/// Why no listing satisfied the match rule. The message shown to the
/// customer explains the mismatch without internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatchReason {
    /// No listing by this creator at all
    NotCreated,
    /// A listing by this creator exists but at the wrong price
    WrongPrice,
    /// A listing matches by creator and price but is not for sale
    NotForSale,
}

impl NoMatchReason {
    pub fn user_message(&self, required_price: i64) -> String {
        match self {
            Self::NotCreated => format!(
                "No gamepass was found on your account. Create one priced at {} Robux and try again.",
                required_price
            ),
            Self::WrongPrice => format!(
                "A gamepass was found but its price does not match. Set the price to exactly {} Robux.",
                required_price
            ),
            Self::NotForSale => {
                "Your gamepass is not for sale. Enable selling and try again.".to_string()
            }
        }
    }
}

/// Result of a verification attempt against the marketplace.
#[derive(Debug, Clone)]
pub enum Verification {
    Matched {
        listing: GamepassCandidate,
        ticket: String,
    },
    NoMatch {
        reason: NoMatchReason,
    },
}

/// Picks the listing satisfying creator (case-insensitive), price and
/// for-sale constraints. When several listings qualify the first in
/// marketplace iteration order wins; the ambiguity is logged, not
/// resolved.
pub fn select_matching<'a>(
    candidates: &'a [GamepassCandidate],
    creator_username: &str,
    required_price: i64,
) -> Result<&'a GamepassCandidate, NoMatchReason> {
    let by_creator: Vec<&GamepassCandidate> = candidates
        .iter()
        .filter(|c| c.creator_name.eq_ignore_ascii_case(creator_username))
        .collect();

    if by_creator.is_empty() {
        return Err(NoMatchReason::NotCreated);
    }

    let priced: Vec<&GamepassCandidate> = by_creator
        .iter()
        .copied()
        .filter(|c| c.price == Some(required_price))
        .collect();

    if priced.is_empty() {
        return Err(NoMatchReason::WrongPrice);
    }

    let for_sale: Vec<&GamepassCandidate> =
        priced.iter().copied().filter(|c| c.is_for_sale).collect();

    match for_sale.as_slice() {
        [] => Err(NoMatchReason::NotForSale),
        [only] => Ok(only),
        [first, ..] => {
            warn!(
                matches = for_sale.len(),
                gamepass_id = first.id,
                "multiple listings satisfy the match rule, taking the first"
            );
            Ok(first)
        }
    }
}

/// A verified gamepass claim, bound to the price it was verified
/// against and signed server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationTicket {
    pub platform_user_id: i64,
    pub gamepass_id: i64,
    pub gamepass_name: String,
    pub required_price: i64,
    pub issued_at: i64,
    pub signature: String,
}

/// Issues and checks verification tickets.
#[derive(Clone)]
pub struct TicketSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TicketSigner {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn signature_payload(
        platform_user_id: i64,
        gamepass_id: i64,
        required_price: i64,
        issued_at: i64,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            platform_user_id, gamepass_id, required_price, issued_at
        )
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Issues a ticket for a matched listing and encodes it as an
    /// opaque token.
    pub fn issue(
        &self,
        platform_user_id: i64,
        listing: &GamepassCandidate,
        required_price: i64,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let issued_at = now.timestamp();
        let signature = self.sign(&Self::signature_payload(
            platform_user_id,
            listing.id,
            required_price,
            issued_at,
        ));
        let ticket = VerificationTicket {
            platform_user_id,
            gamepass_id: listing.id,
            gamepass_name: listing.name.clone(),
            required_price,
            issued_at,
            signature,
        };
        let json = serde_json::to_vec(&ticket)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Decodes a token and checks its signature and TTL. Returns the
    /// verified ticket; price-staleness against the current requested
    /// amount is the caller's check.
    pub fn decode(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationTicket, ServiceError> {
        let invalid =
            || ServiceError::ValidationError("Gamepass verification is invalid".to_string());

        let json = BASE64.decode(token.trim()).map_err(|_| invalid())?;
        let ticket: VerificationTicket = serde_json::from_slice(&json).map_err(|_| invalid())?;

        let payload = Self::signature_payload(
            ticket.platform_user_id,
            ticket.gamepass_id,
            ticket.required_price,
            ticket.issued_at,
        );
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        let signature_bytes = hex::decode(&ticket.signature).map_err(|_| invalid())?;
        mac.verify_slice(&signature_bytes).map_err(|_| invalid())?;

        let age = now.timestamp() - ticket.issued_at;
        if age < 0 || age as u64 > self.ttl.as_secs() {
            return Err(ServiceError::ValidationError(
                "Gamepass verification has expired, please verify again".to_string(),
            ));
        }

        Ok(ticket)
    }
}

// ---------------------------------------------------------------------------
// Wire payloads. Deserialized leniently: a malformed entry is skipped,
// a malformed page ends the scan; neither is allowed to crash a
// verification.

#[derive(Debug, Deserialize)]
struct UserPayload {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListingsPage {
    #[serde(default)]
    data: Vec<RawListing>,
    #[serde(default, rename = "nextPageCursor")]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawListing {
    id: Option<i64>,
    name: Option<String>,
    price: Option<i64>,
    #[serde(default, rename = "isForSale")]
    is_for_sale: bool,
    creator: Option<RawCreator>,
}

#[derive(Debug, Deserialize)]
struct RawCreator {
    name: Option<String>,
}

impl RawListing {
    fn into_candidate(self) -> Option<GamepassCandidate> {
        Some(GamepassCandidate {
            id: self.id?,
            name: self.name?,
            price: self.price,
            is_for_sale: self.is_for_sale,
            creator_name: self.creator.and_then(|c| c.name).unwrap_or_default(),
        })
    }
}

/// Queries the marketplace and decides whether a matching gamepass
/// exists.
#[derive(Clone)]
pub struct GamepassVerifier {
    http: reqwest::Client,
    users_base_url: String,
    games_base_url: String,
    max_pages: u32,
    signer: TicketSigner,
}

impl GamepassVerifier {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.marketplace_timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.marketplace_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            users_base_url: cfg.marketplace_users_base_url.trim_end_matches('/').to_string(),
            games_base_url: cfg.marketplace_games_base_url.trim_end_matches('/').to_string(),
            max_pages: cfg.marketplace_max_pages.max(1),
            signer: TicketSigner::new(&cfg.verification_signing_secret, cfg.verification_ttl_secs),
        })
    }

    pub fn signer(&self) -> &TicketSigner {
        &self.signer
    }

    /// Resolves the platform username for a user id. Best-effort: any
    /// failure degrades to an empty username rather than aborting the
    /// verification.
    #[instrument(skip(self))]
    pub async fn resolve_username(&self, platform_user_id: i64) -> String {
        let url = format!("{}/v1/users/{}", self.users_base_url, platform_user_id);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "username resolution failed, continuing without it");
                return String::new();
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "username resolution returned an error status");
            return String::new();
        }

        match response.json::<UserPayload>().await {
            Ok(payload) => payload.name.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "username payload was malformed");
                String::new()
            }
        }
    }

    /// Fetches the user's marketplace listings, paging until the
    /// cursor is exhausted (bounded by `max_pages`).
    async fn fetch_listings(
        &self,
        platform_user_id: i64,
    ) -> Result<Vec<GamepassCandidate>, ServiceError> {
        let url = format!(
            "{}/v1/users/{}/gamepasses",
            self.games_base_url, platform_user_id
        );

        let mut candidates = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..self.max_pages {
            let mut request = self.http.get(&url).query(&[("limit", "100")]);
            if let Some(ref c) = cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }

            let response = request.send().await.map_err(|e| {
                ServiceError::ExternalServiceError(format!("marketplace unreachable: {}", e))
            })?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                return Err(ServiceError::ExternalServiceError(
                    "marketplace rate limited the request".to_string(),
                ));
            }
            if !response.status().is_success() {
                return Err(ServiceError::ExternalServiceError(format!(
                    "marketplace returned status {}",
                    response.status()
                )));
            }

            let payload: ListingsPage = match response.json().await {
                Ok(payload) => payload,
                Err(e) => {
                    // Malformed payload means no decidable match, not a crash
                    warn!(error = %e, page, "malformed marketplace page, ending scan");
                    break;
                }
            };

            candidates.extend(payload.data.into_iter().filter_map(RawListing::into_candidate));

            match payload.next_page_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(candidates)
    }

    /// Runs the full verification protocol for a user against the
    /// required price and, on success, issues a price-bound ticket.
    #[instrument(skip(self))]
    pub async fn verify(
        &self,
        platform_user_id: i64,
        required_price: i64,
    ) -> Result<Verification, ServiceError> {
        let username = self.resolve_username(platform_user_id).await;
        let candidates = self.fetch_listings(platform_user_id).await?;

        info!(
            candidates = candidates.len(),
            %username,
            required_price,
            "evaluating marketplace listings"
        );

        match select_matching(&candidates, &username, required_price) {
            Ok(listing) => {
                let ticket =
                    self.signer
                        .issue(platform_user_id, listing, required_price, Utc::now())?;
                Ok(Verification::Matched {
                    listing: listing.clone(),
                    ticket,
                })
            }
            Err(reason) => Ok(Verification::NoMatch { reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        id: i64,
        name: &str,
        price: Option<i64>,
        is_for_sale: bool,
        creator: &str,
    ) -> GamepassCandidate {
        GamepassCandidate {
            id,
            name: name.into(),
            price,
            is_for_sale,
            creator_name: creator.into(),
        }
    }

    #[test]
    fn matching_listing_is_selected() {
        let listings = vec![
            candidate(1, "Cheap", Some(100), true, "Seller"),
            candidate(2, "Robux 715", Some(715), true, "Seller"),
        ];
        let selected = select_matching(&listings, "Seller", 715).unwrap();
        assert_eq!(selected.id, 2);
    }

    #[test]
    fn creator_comparison_is_case_insensitive() {
        let listings = vec![candidate(1, "Robux 715", Some(715), true, "SeLLeR")];
        assert!(select_matching(&listings, "seller", 715).is_ok());
    }

    #[test]
    fn not_for_sale_never_matches() {
        // Name and price match exactly, but the listing is off sale
        let listings = vec![candidate(1, "Robux 715", Some(715), false, "Seller")];
        assert_eq!(
            select_matching(&listings, "Seller", 715).unwrap_err(),
            NoMatchReason::NotForSale
        );
    }

    #[test]
    fn wrong_price_is_reported_as_such() {
        let listings = vec![candidate(1, "Robux", Some(700), true, "Seller")];
        assert_eq!(
            select_matching(&listings, "Seller", 715).unwrap_err(),
            NoMatchReason::WrongPrice
        );
    }

    #[test]
    fn foreign_listings_do_not_count() {
        let listings = vec![candidate(1, "Robux 715", Some(715), true, "SomeoneElse")];
        assert_eq!(
            select_matching(&listings, "Seller", 715).unwrap_err(),
            NoMatchReason::NotCreated
        );
    }

    #[test]
    fn first_of_multiple_matches_wins() {
        let listings = vec![
            candidate(10, "A", Some(715), true, "Seller"),
            candidate(20, "B", Some(715), true, "Seller"),
        ];
        assert_eq!(select_matching(&listings, "Seller", 715).unwrap().id, 10);
    }

    #[test]
    fn unpriced_listing_is_a_price_mismatch() {
        let listings = vec![candidate(1, "Robux", None, true, "Seller")];
        assert_eq!(
            select_matching(&listings, "Seller", 715).unwrap_err(),
            NoMatchReason::WrongPrice
        );
    }

    fn signer() -> TicketSigner {
        TicketSigner::new("a-very-long-test-signing-secret-42", 900)
    }

    #[test]
    fn ticket_roundtrip() {
        let s = signer();
        let listing = candidate(42, "Robux 715", Some(715), true, "Seller");
        let now = Utc::now();
        let token = s.issue(9001, &listing, 715, now).unwrap();
        let ticket = s.decode(&token, now).unwrap();
        assert_eq!(ticket.platform_user_id, 9001);
        assert_eq!(ticket.gamepass_id, 42);
        assert_eq!(ticket.required_price, 715);
    }

    #[test]
    fn tampered_ticket_is_rejected() {
        let s = signer();
        let listing = candidate(42, "Robux 715", Some(715), true, "Seller");
        let now = Utc::now();
        let token = s.issue(9001, &listing, 715, now).unwrap();

        // Forge a ticket claiming a different price but keep the
        // original signature
        let json = BASE64.decode(&token).unwrap();
        let mut ticket: VerificationTicket = serde_json::from_slice(&json).unwrap();
        ticket.required_price = 1;
        let forged = BASE64.encode(serde_json::to_vec(&ticket).unwrap());

        assert!(s.decode(&forged, now).is_err());
    }

    #[test]
    fn expired_ticket_is_rejected() {
        let s = signer();
        let listing = candidate(42, "Robux 715", Some(715), true, "Seller");
        let issued = Utc::now() - chrono::Duration::seconds(901);
        let token = s.issue(9001, &listing, 715, issued).unwrap();
        let err = s.decode(&token, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn ticket_from_a_different_secret_is_rejected() {
        let issuing = TicketSigner::new("one-signing-secret-that-is-long", 900);
        let checking = TicketSigner::new("another-signing-secret-entirely", 900);
        let listing = candidate(42, "Robux 715", Some(715), true, "Seller");
        let now = Utc::now();
        let token = issuing.issue(9001, &listing, 715, now).unwrap();
        assert!(checking.decode(&token, now).is_err());
    }
}
