//! Request bodies accepted by the delivery service and their validation.
//!
//! Fields missing from the JSON body decode to their empty value so that
//! the caller gets a field-specific validation message rather than a
//! generic decode error. Rules are checked in declaration order and the
//! first failure wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use waybill_core::{
    DeliveryWindow, Location, NotificationStatus, RoutingInfo, Shipment, ShipmentId, UserInfo,
};

use crate::error::{Result, ServiceError};

/// Body of `POST /request`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInput {
    pub shipment_uid: ShipmentId,
    pub user_info: UserInfo,
    pub routing_info: RoutingInfo,
    pub scheduled_delivery_window: DeliveryWindow,
}

impl RequestInput {
    /// Checks every documented rule against `now`.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` naming the first offending field.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.shipment_uid.is_empty() {
            return Err(invalid("shipment_uid is required"));
        }
        if self.user_info.user_uid.is_empty() {
            return Err(invalid("user_info.user_uid is required"));
        }
        if self.user_info.address.is_empty() {
            return Err(invalid("user_info.address is required"));
        }

        validate_location(&self.routing_info.origin, "routing_info.origin")?;
        validate_location(&self.routing_info.destination, "routing_info.destination")?;

        let window = &self.scheduled_delivery_window;
        if window.end_time <= now {
            return Err(invalid("scheduled_delivery_window.end_time expired"));
        }
        if window.end_time - window.start_time != DeliveryWindow::required_length() {
            return Err(invalid("scheduled_delivery_window must be 2 hours"));
        }

        Ok(())
    }

    /// Builds the shipment this request creates at `now`.
    pub fn into_shipment(self, now: DateTime<Utc>) -> Shipment {
        let status = Shipment::initial_status(&self.scheduled_delivery_window, now);
        Shipment {
            uid: self.shipment_uid,
            user_uid: self.user_info.user_uid,
            user_address: self.user_info.address,
            routing: self.routing_info,
            window: self.scheduled_delivery_window,
            status,
        }
    }
}

fn validate_location(location: &Location, path: &str) -> Result<()> {
    if !(-90.0..=90.0).contains(&location.lat) {
        return Err(ServiceError::Validation(format!("{path}.lat must be between -90 and 90")));
    }
    if !(-180.0..=180.0).contains(&location.long) {
        return Err(ServiceError::Validation(format!(
            "{path}.long must be between -180 and 180"
        )));
    }
    Ok(())
}

/// Body of `POST /webhook`.
///
/// `status` stays a string until validation so that an unknown value is a
/// 400 with a readable message instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookInput {
    pub shipment_uid: ShipmentId,
    pub status: String,
}

impl WebhookInput {
    /// Validates the body and parses its status.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for a missing field or an unknown
    /// status.
    pub fn validate(&self) -> Result<NotificationStatus> {
        if self.shipment_uid.is_empty() {
            return Err(invalid("shipment_uid is required"));
        }
        if self.status.is_empty() {
            return Err(invalid("status is required"));
        }
        self.status.parse().map_err(|_| invalid(format!("unknown status: {}", self.status)))
    }
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::Validation(message.into())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::TimeDelta;
    use proptest::prelude::*;

    use super::*;

    fn valid_input(now: DateTime<Utc>) -> RequestInput {
        RequestInput {
            shipment_uid: ShipmentId::new("ship-1"),
            user_info: UserInfo { user_uid: "user-1".into(), address: "1 Main St".into() },
            routing_info: RoutingInfo {
                origin: Location { lat: 52.52, long: 13.40 },
                destination: Location { lat: 48.85, long: 2.35 },
            },
            scheduled_delivery_window: DeliveryWindow::starting_at(now + TimeDelta::hours(3)),
        }
    }

    fn message(result: Result<()>) -> String {
        match result {
            Err(ServiceError::Validation(message)) => message,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn valid_request_passes() {
        let now = Utc::now();
        assert!(valid_input(now).validate(now).is_ok());
    }

    #[test]
    fn latitude_out_of_range_names_the_field() {
        let now = Utc::now();
        let mut input = valid_input(now);
        input.routing_info.origin = Location { lat: 91.0, long: 0.0 };

        assert_eq!(
            message(input.validate(now)),
            "routing_info.origin.lat must be between -90 and 90"
        );
    }

    #[test]
    fn destination_longitude_out_of_range_names_the_field() {
        let now = Utc::now();
        let mut input = valid_input(now);
        input.routing_info.destination.long = -180.5;

        assert_eq!(
            message(input.validate(now)),
            "routing_info.destination.long must be between -180 and 180"
        );
    }

    #[test]
    fn required_fields_are_checked_first() {
        let now = Utc::now();
        assert_eq!(message(RequestInput::default().validate(now)), "shipment_uid is required");

        let mut input = valid_input(now);
        input.user_info.user_uid.clear();
        assert_eq!(message(input.validate(now)), "user_info.user_uid is required");

        let mut input = valid_input(now);
        input.user_info.address.clear();
        assert_eq!(message(input.validate(now)), "user_info.address is required");
    }

    #[test]
    fn window_must_end_in_the_future() {
        let now = Utc::now();
        let mut input = valid_input(now);
        input.scheduled_delivery_window = DeliveryWindow::starting_at(now - TimeDelta::hours(2));

        assert_eq!(message(input.validate(now)), "scheduled_delivery_window.end_time expired");
    }

    #[test]
    fn window_must_be_exactly_two_hours() {
        let now = Utc::now();
        let mut input = valid_input(now);
        input.scheduled_delivery_window.end_time += TimeDelta::seconds(1);

        assert_eq!(message(input.validate(now)), "scheduled_delivery_window must be 2 hours");
    }

    #[test]
    fn missing_json_fields_decode_and_fail_validation() {
        let input: RequestInput = serde_json::from_str(r#"{"shipment_uid": "s-1"}"#).unwrap();
        assert_eq!(message(input.validate(Utc::now())), "user_info.user_uid is required");
    }

    #[test]
    fn started_window_builds_requested_shipment() {
        let now = Utc::now();
        let mut input = valid_input(now);
        input.scheduled_delivery_window = DeliveryWindow::starting_at(now - TimeDelta::hours(1));

        let shipment = input.into_shipment(now);

        assert_eq!(shipment.status, waybill_core::ShipmentStatus::Requested);
        assert_eq!(shipment.user_address, "1 Main St");
    }

    #[test]
    fn webhook_requires_uid_and_known_status() {
        let missing_uid = WebhookInput { shipment_uid: ShipmentId::default(), status: "found".into() };
        assert!(matches!(
            missing_uid.validate(),
            Err(ServiceError::Validation(m)) if m == "shipment_uid is required"
        ));

        let missing_status = WebhookInput { shipment_uid: "s-1".into(), status: String::new() };
        assert!(matches!(
            missing_status.validate(),
            Err(ServiceError::Validation(m)) if m == "status is required"
        ));

        let unknown = WebhookInput { shipment_uid: "s-1".into(), status: "lost".into() };
        assert!(matches!(
            unknown.validate(),
            Err(ServiceError::Validation(m)) if m == "unknown status: lost"
        ));

        let ok = WebhookInput { shipment_uid: "s-1".into(), status: "not_found".into() };
        assert_eq!(ok.validate().unwrap(), NotificationStatus::NotFound);
    }

    proptest! {
        #[test]
        fn latitude_accepted_iff_within_bounds(lat in -200.0f64..200.0) {
            let now = Utc::now();
            let mut input = valid_input(now);
            input.routing_info.origin.lat = lat;

            prop_assert_eq!(input.validate(now).is_ok(), (-90.0..=90.0).contains(&lat));
        }

        #[test]
        fn longitude_accepted_iff_within_bounds(long in -400.0f64..400.0) {
            let now = Utc::now();
            let mut input = valid_input(now);
            input.routing_info.destination.long = long;

            prop_assert_eq!(input.validate(now).is_ok(), (-180.0..=180.0).contains(&long));
        }
    }
}
