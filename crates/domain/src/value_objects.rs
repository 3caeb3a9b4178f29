//! Value objects shared by orders, listings and shipments.

use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in cents (e.g., 1000 = $10.00)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from a dollar value.
    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Formats the amount as a plain decimal string (`12.50`), the way
    /// carriers expect declared values.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.cents < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.dollars().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

/// Identifier the carrier assigned to a shipment (`shp_...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarrierShipmentId(String);

impl CarrierShipmentId {
    /// Wraps a carrier-assigned shipment id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CarrierShipmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CarrierShipmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CarrierShipmentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub street1: String,
    #[serde(default)]
    pub street2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Address {
    /// Returns a copy of this address addressed to someone else.
    pub fn addressed_to(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Package dimensions sent to the carrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    /// Weight in ounces.
    pub weight_oz: f64,
    /// Carrier predefined package name, e.g. `LargeFlatRateBox`.
    #[serde(default)]
    pub predefined_package: Option<String>,
}

impl Parcel {
    /// Package used when a listing does not name one.
    pub const DEFAULT_PACKAGE: &'static str = "LargeFlatRateBox";

    /// Creates a parcel, falling back to the default predefined package.
    pub fn new(weight_oz: f64, predefined_package: Option<String>) -> Self {
        Self {
            weight_oz,
            predefined_package: predefined_package
                .or_else(|| Some(Self::DEFAULT_PACKAGE.to_string())),
        }
    }
}

/// One line on a customs declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomsItem {
    pub description: String,
    pub quantity: u32,
    pub value: Money,
    pub weight_oz: f64,
    pub origin_country: String,
}

/// Customs paperwork attached to a shipment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomsDeclaration {
    /// Carrier contents type; goods sold on the marketplace are `other`.
    pub contents_type: String,
    pub signer: String,
    pub items: Vec<CustomsItem>,
}

impl CustomsDeclaration {
    /// Declaration for a single item of merchandise.
    pub fn single_item(signer: impl Into<String>, item: CustomsItem) -> Self {
        Self {
            contents_type: "other".to_string(),
            signer: signer.into(),
            items: vec![item],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_formats() {
        assert_eq!(Money::from_cents(1250).to_string(), "$12.50");
        assert_eq!(Money::from_cents(-5).to_string(), "-$0.05");
        assert_eq!(Money::from_cents(1250).to_decimal_string(), "12.50");
        assert_eq!(Money::from_dollars(3).cents(), 300);
    }

    #[test]
    fn parcel_defaults_package() {
        let parcel = Parcel::new(12.0, None);
        assert_eq!(
            parcel.predefined_package.as_deref(),
            Some(Parcel::DEFAULT_PACKAGE)
        );

        let custom = Parcel::new(12.0, Some("FlatRateEnvelope".into()));
        assert_eq!(
            custom.predefined_package.as_deref(),
            Some("FlatRateEnvelope")
        );
    }

    #[test]
    fn single_item_customs_uses_other_contents() {
        let item = CustomsItem {
            description: "Vintage jacket".into(),
            quantity: 1,
            value: Money::from_cents(4000),
            weight_oz: 20.0,
            origin_country: "US".into(),
        };
        let declaration = CustomsDeclaration::single_item("Jane Buyer", item);
        assert_eq!(declaration.contents_type, "other");
        assert_eq!(declaration.items.len(), 1);
    }
}
