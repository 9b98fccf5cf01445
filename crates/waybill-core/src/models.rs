//! Domain models and strongly-typed identifiers.
//!
//! Defines the delivery-side [`Shipment`], the courier-side
//! [`CourierRequest`], their status machines, and the webhook payload that
//! couples the two services. Status enums are stored as lowercase text.

use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult = Result<sqlx::encode::IsNull, sqlx::error::BoxDynError>;
type BoxDynError = sqlx::error::BoxDynError;

/// Externally assigned shipment identifier.
///
/// Immutable for the lifetime of a shipment and shared by both services: the
/// delivery store keys shipments by it and the courier store keys its
/// tracking rows by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub String);

impl ShipmentId {
    /// Wraps an identifier.
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ShipmentId {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

impl From<&str> for ShipmentId {
    fn from(uid: &str) -> Self {
        Self(uid.to_string())
    }
}

impl sqlx::Type<PgDb> for ShipmentId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ShipmentId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        Ok(Self(<String as sqlx::Decode<PgDb>>::decode(value)?))
    }
}

impl sqlx::Encode<'_, PgDb> for ShipmentId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude, valid range [-90, 90].
    pub lat: f64,
    /// Longitude, valid range [-180, 180].
    pub long: f64,
}

/// Pickup and drop-off points of a shipment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    /// Where the courier picks the parcel up.
    pub origin: Location,
    /// Where the parcel is delivered.
    pub destination: Location,
}

/// Recipient of a shipment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Recipient identifier.
    pub user_uid: String,
    /// Recipient postal address.
    pub address: String,
}

/// Scheduled delivery window. Always exactly two hours long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryWindow {
    /// Earliest delivery time.
    pub start_time: DateTime<Utc>,
    /// Latest delivery time.
    pub end_time: DateTime<Utc>,
}

impl DeliveryWindow {
    /// The only accepted window length.
    pub fn required_length() -> TimeDelta {
        TimeDelta::hours(2)
    }

    /// Builds a window of the required length starting at `start_time`.
    pub fn starting_at(start_time: DateTime<Utc>) -> Self {
        Self { start_time, end_time: start_time + Self::required_length() }
    }

    /// Returns true once the window has opened at `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time < now
    }
}

/// Delivery-side shipment lifecycle.
///
/// ```text
/// queued ──▶ pending ──▶ requested ──▶ shipped
/// ```
///
/// `queued → pending` and `pending → requested` are driven by store-polling
/// workers. `requested → shipped` is driven only by an inbound webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    /// Window opens later than the pending lookahead.
    Queued,
    /// Window opens soon; waiting for a courier request.
    Pending,
    /// A courier has been requested from the 3PL.
    Requested,
    /// The 3PL reported the parcel as shipped.
    Shipped,
}

impl ShipmentStatus {
    /// Text form stored in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Requested => "requested",
            Self::Shipped => "shipped",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "pending" => Ok(Self::Pending),
            "requested" => Ok(Self::Requested),
            "shipped" => Ok(Self::Shipped),
            _ => Err(CoreError::Decode(format!("invalid shipment status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for ShipmentStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ShipmentStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for ShipmentStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Shipment as tracked by the delivery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    /// Immutable identifier.
    pub uid: ShipmentId,
    /// Recipient identifier.
    pub user_uid: String,
    /// Recipient address.
    pub user_address: String,
    /// Pickup and drop-off points.
    pub routing: RoutingInfo,
    /// Scheduled delivery window.
    pub window: DeliveryWindow,
    /// Current lifecycle state.
    pub status: ShipmentStatus,
}

impl Shipment {
    /// Status a freshly created shipment starts in.
    ///
    /// A shipment whose window has already opened skips the queue and is
    /// requested immediately.
    pub fn initial_status(window: &DeliveryWindow, now: DateTime<Utc>) -> ShipmentStatus {
        if window.has_started(now) {
            ShipmentStatus::Requested
        } else {
            ShipmentStatus::Queued
        }
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Shipment {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            uid: row.try_get("uid")?,
            user_uid: row.try_get("user_uid")?,
            user_address: row.try_get("user_address")?,
            routing: RoutingInfo {
                origin: Location {
                    lat: row.try_get("origin_lat")?,
                    long: row.try_get("origin_long")?,
                },
                destination: Location {
                    lat: row.try_get("destination_lat")?,
                    long: row.try_get("destination_long")?,
                },
            },
            window: DeliveryWindow {
                start_time: row.try_get("window_start")?,
                end_time: row.try_get("window_end")?,
            },
            status: row.try_get("status")?,
        })
    }
}

/// Courier-side search lifecycle.
///
/// ```text
/// requested ──▶ searching ──▶ found ──▶ shipped
///     ▲              │
///     └─ not found ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourierStatus {
    /// Waiting for the searching worker.
    Requested,
    /// Search in progress.
    Searching,
    /// A courier was assigned.
    Found,
    /// Parcel handed to the courier.
    Shipped,
}

impl CourierStatus {
    /// Text form stored in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Searching => "searching",
            Self::Found => "found",
            Self::Shipped => "shipped",
        }
    }
}

impl fmt::Display for CourierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourierStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "searching" => Ok(Self::Searching),
            "found" => Ok(Self::Found),
            "shipped" => Ok(Self::Shipped),
            _ => Err(CoreError::Decode(format!("invalid courier status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for CourierStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for CourierStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for CourierStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Courier tracking row kept by the 3PL simulator.
///
/// Logically references a [`Shipment`] by identifier; the two live in
/// different stores so no foreign key exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourierRequest {
    /// Shipment this row tracks. Unique.
    pub shipment_uid: ShipmentId,
    /// When the next worker may pick the row up.
    pub next_check_at: DateTime<Utc>,
    /// Number of intake calls seen, saturating at [`CourierRequest::MAX_RETRIES`].
    pub retries: i32,
    /// Current lifecycle state.
    pub status: CourierStatus,
}

impl CourierRequest {
    /// Intake calls after which the search is bypassed and the row forced to
    /// `found`.
    pub const MAX_RETRIES: i32 = 3;

    /// Returns true once retries have saturated.
    pub fn is_saturated(&self) -> bool {
        self.retries >= Self::MAX_RETRIES
    }
}

/// Status carried by a webhook notification.
///
/// A superset of [`CourierStatus`]: `not_found` is reported but never
/// persisted, and `requested` is emitted by the delivery service towards the
/// core collaborator after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Courier requested from the 3PL.
    Requested,
    /// 3PL started searching.
    Searching,
    /// Courier found.
    Found,
    /// No courier available in this search round.
    NotFound,
    /// Parcel shipped.
    Shipped,
}

impl NotificationStatus {
    /// Wire form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Searching => "searching",
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Shipped => "shipped",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "searching" => Ok(Self::Searching),
            "found" => Ok(Self::Found),
            "not_found" => Ok(Self::NotFound),
            "shipped" => Ok(Self::Shipped),
            _ => Err(CoreError::InvalidInput(format!("unknown status: {s}"))),
        }
    }
}

impl From<CourierStatus> for NotificationStatus {
    fn from(status: CourierStatus) -> Self {
        match status {
            CourierStatus::Requested => Self::Requested,
            CourierStatus::Searching => Self::Searching,
            CourierStatus::Found => Self::Found,
            CourierStatus::Shipped => Self::Shipped,
        }
    }
}

/// Webhook payload exchanged between services: `{shipment_uid, status}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    /// Shipment the status refers to.
    pub shipment_uid: ShipmentId,
    /// New status.
    pub status: NotificationStatus,
}

impl StatusNotification {
    /// Builds a notification.
    pub fn new(shipment_uid: ShipmentId, status: NotificationStatus) -> Self {
        Self { shipment_uid, status }
    }
}
