//! REST client for the carrier API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Address, CarrierShipmentId, CustomsDeclaration, CustomsItem, Parcel};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{
    CarrierBatch, CarrierError, CarrierGateway, CarrierObject, CarrierPickup, CarrierShipment,
    CarrierTracker, PickupRequest, RefundStatus, ShipmentDraft, ShipmentRequest,
};

#[derive(Serialize)]
struct AddressBody<'a> {
    #[serde(flatten)]
    address: &'a Address,
}

#[derive(Serialize)]
struct ParcelBody<'a> {
    weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    predefined_package: Option<&'a str>,
}

impl<'a> From<&'a Parcel> for ParcelBody<'a> {
    fn from(parcel: &'a Parcel) -> Self {
        Self {
            weight: parcel.weight_oz,
            predefined_package: parcel.predefined_package.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct CustomsItemBody<'a> {
    description: &'a str,
    quantity: u32,
    value: f64,
    weight: f64,
    origin_country: &'a str,
}

impl<'a> From<&'a CustomsItem> for CustomsItemBody<'a> {
    fn from(item: &'a CustomsItem) -> Self {
        Self {
            description: &item.description,
            quantity: item.quantity,
            value: item.value.cents() as f64 / 100.0,
            weight: item.weight_oz,
            origin_country: &item.origin_country,
        }
    }
}

#[derive(Serialize)]
struct CustomsInfoBody<'a> {
    customs_certify: bool,
    customs_signer: &'a str,
    contents_type: &'a str,
    eel_pfc: &'static str,
    non_delivery_option: &'static str,
    restriction_type: &'static str,
    customs_items: Vec<CustomsItemBody<'a>>,
}

impl<'a> From<&'a CustomsDeclaration> for CustomsInfoBody<'a> {
    fn from(customs: &'a CustomsDeclaration) -> Self {
        Self {
            customs_certify: true,
            customs_signer: &customs.signer,
            contents_type: &customs.contents_type,
            eel_pfc: "NOEEI 30.37(a)",
            non_delivery_option: "return",
            restriction_type: "none",
            customs_items: customs.items.iter().map(CustomsItemBody::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct BatchShipmentBody<'a> {
    reference: &'a str,
    to_address: AddressBody<'a>,
    from_address: AddressBody<'a>,
    parcel: ParcelBody<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customs_info: Option<CustomsInfoBody<'a>>,
    carrier: &'a str,
    service: &'a str,
}

impl<'a> From<&'a ShipmentRequest> for BatchShipmentBody<'a> {
    fn from(request: &'a ShipmentRequest) -> Self {
        Self {
            reference: &request.reference,
            to_address: AddressBody {
                address: &request.to_address,
            },
            from_address: AddressBody {
                address: &request.from_address,
            },
            parcel: ParcelBody::from(&request.parcel),
            customs_info: request.customs_info.as_ref().map(CustomsInfoBody::from),
            carrier: &request.carrier,
            service: &request.service,
        }
    }
}

#[derive(Serialize)]
struct PickupBody<'a> {
    reference: &'a str,
    shipment: CarrierObject,
    address: AddressBody<'a>,
    min_datetime: DateTime<Utc>,
    max_datetime: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    is_account_address: bool,
}

/// Maps a non-success response onto the error taxonomy.
fn classify(status: StatusCode, retry_after: Option<Duration>, body: String) -> CarrierError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CarrierError::RateLimited { retry_after },
        StatusCode::NOT_FOUND => CarrierError::NotFound(body),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            CarrierError::Transport(format!("HTTP {s}: {body}"))
        }
        s => CarrierError::Rejected(format!("HTTP {s}: {body}")),
    }
}

fn transport(err: reqwest::Error) -> CarrierError {
    if err.is_decode() {
        CarrierError::Decode(err.to_string())
    } else {
        CarrierError::Transport(err.to_string())
    }
}

/// Carrier gateway speaking the carrier's JSON REST API.
#[derive(Debug, Clone)]
pub struct HttpCarrierGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpCarrierGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, CarrierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .basic_auth(&self.api_key, None::<&str>)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .basic_auth(&self.api_key, None::<&str>)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CarrierError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(transport);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(%status, body = %body, "Carrier request failed");
        Err(classify(status, retry_after, body))
    }
}

#[async_trait]
impl CarrierGateway for HttpCarrierGateway {
    async fn create_address(&self, address: &Address) -> Result<CarrierObject, CarrierError> {
        let address = AddressBody { address };
        let body = json!({ "address": address, "verify": ["delivery"] });
        self.send(self.post("addresses").json(&body)).await
    }

    async fn create_parcel(&self, parcel: &Parcel) -> Result<CarrierObject, CarrierError> {
        let body = json!({ "parcel": ParcelBody::from(parcel) });
        self.send(self.post("parcels").json(&body)).await
    }

    async fn create_customs_info(
        &self,
        customs: &CustomsDeclaration,
    ) -> Result<CarrierObject, CarrierError> {
        let body = json!({ "customs_info": CustomsInfoBody::from(customs) });
        self.send(self.post("customs_infos").json(&body)).await
    }

    async fn create_shipment(
        &self,
        draft: &ShipmentDraft,
        buy_label: bool,
    ) -> Result<CarrierShipment, CarrierError> {
        let body = json!({
            "shipment": {
                "reference": draft.reference,
                "to_address": draft.to_address,
                "from_address": draft.from_address,
                "parcel": draft.parcel,
                "customs_info": draft.customs_info,
            }
        });
        let shipment: CarrierShipment = self.send(self.post("shipments").json(&body)).await?;
        if !buy_label {
            return Ok(shipment);
        }

        let rate = shipment
            .preferred_rate(&draft.carrier, &draft.service)
            .ok_or_else(|| {
                CarrierError::Rejected(format!("no rates offered for shipment {}", shipment.id))
            })?;
        let body = json!({ "rate": { "id": rate.id } });
        self.send(
            self.post(&format!("shipments/{}/buy", shipment.id))
                .json(&body),
        )
        .await
    }

    async fn retrieve_shipment(
        &self,
        id: &CarrierShipmentId,
    ) -> Result<CarrierShipment, CarrierError> {
        self.send(self.get(&format!("shipments/{id}"))).await
    }

    async fn refund_shipment(&self, id: &CarrierShipmentId) -> Result<RefundStatus, CarrierError> {
        let shipment: CarrierShipment = self
            .send(self.post(&format!("shipments/{id}/refund")))
            .await?;
        Ok(shipment.refund_status.unwrap_or(RefundStatus::Unknown))
    }

    async fn create_batch(&self, shipments: &[ShipmentRequest]) -> Result<CarrierBatch, CarrierError> {
        let shipments: Vec<BatchShipmentBody<'_>> =
            shipments.iter().map(BatchShipmentBody::from).collect();
        let body = json!({ "batch": { "shipments": shipments } });
        self.send(self.post("batches").json(&body)).await
    }

    async fn buy_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError> {
        self.send(self.post(&format!("batches/{batch_id}/buy"))).await
    }

    async fn retrieve_batch(&self, batch_id: &str) -> Result<CarrierBatch, CarrierError> {
        self.send(self.get(&format!("batches/{batch_id}"))).await
    }

    async fn create_and_buy_pickup(
        &self,
        request: &PickupRequest,
    ) -> Result<CarrierPickup, CarrierError> {
        let pickup = PickupBody {
            reference: &request.reference,
            shipment: CarrierObject {
                id: request.shipment_id.to_string(),
            },
            address: AddressBody {
                address: &request.address,
            },
            min_datetime: request.min_datetime,
            max_datetime: request.max_datetime,
            instructions: request.instructions.as_deref(),
            is_account_address: false,
        };
        let body = json!({ "pickup": pickup });
        let pickup: CarrierPickup = self.send(self.post("pickups").json(&body)).await?;
        self.buy_offered_rate(pickup).await
    }

    async fn buy_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError> {
        let pickup: CarrierPickup = self.send(self.get(&format!("pickups/{pickup_id}"))).await?;
        self.buy_offered_rate(pickup).await
    }

    async fn cancel_pickup(&self, pickup_id: &str) -> Result<CarrierPickup, CarrierError> {
        self.send(self.post(&format!("pickups/{pickup_id}/cancel")))
            .await
    }

    async fn retrieve_tracker(&self, tracker_id: &str) -> Result<CarrierTracker, CarrierError> {
        self.send(self.get(&format!("trackers/{tracker_id}"))).await
    }
}

impl HttpCarrierGateway {
    /// Buys the first rate the carrier offered for a pickup.
    async fn buy_offered_rate(&self, pickup: CarrierPickup) -> Result<CarrierPickup, CarrierError> {
        let Some(rate) = pickup.pickup_rates.first() else {
            return Ok(pickup);
        };
        let body = json!({ "carrier": rate.carrier, "service": rate.service });
        self.send(
            self.post(&format!("pickups/{}/buy", pickup.id))
                .json(&body),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;

    fn address() -> Address {
        Address {
            name: "Sam Seller".to_string(),
            company: None,
            street1: "5 Elm St".to_string(),
            street2: None,
            city: "Boston".to_string(),
            state: "MA".to_string(),
            zip: "02108".to_string(),
            country: "US".to_string(),
            phone: Some("555-0100".to_string()),
        }
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(3)), String::new()),
            CarrierError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, None, "missing".into()),
            CarrierError::NotFound(_)
        ));
        assert!(classify(StatusCode::BAD_GATEWAY, None, String::new()).is_retryable());
        assert!(!classify(StatusCode::UNPROCESSABLE_ENTITY, None, String::new()).is_retryable());
    }

    #[test]
    fn test_batch_body_shape() {
        let request = ShipmentRequest {
            reference: "ORDER_ITEM__1".to_string(),
            to_address: address(),
            from_address: address(),
            parcel: Parcel::new(16.0, None),
            customs_info: Some(CustomsDeclaration::single_item(
                "Sam Seller",
                CustomsItem {
                    description: "Vintage lamp".to_string(),
                    quantity: 1,
                    value: Money::from_cents(2550),
                    weight_oz: 16.0,
                    origin_country: "US".to_string(),
                },
            )),
            carrier: "USPS".to_string(),
            service: "Priority".to_string(),
        };

        let body = serde_json::to_value(BatchShipmentBody::from(&request)).unwrap();
        assert_eq!(body["reference"], "ORDER_ITEM__1");
        assert_eq!(body["to_address"]["street1"], "5 Elm St");
        assert_eq!(body["parcel"]["weight"], 16.0);
        assert_eq!(body["parcel"]["predefined_package"], "LargeFlatRateBox");
        assert_eq!(body["customs_info"]["contents_type"], "other");
        assert_eq!(body["customs_info"]["customs_items"][0]["value"], 25.5);
        assert_eq!(body["service"], "Priority");
    }

    #[test]
    fn test_url_joining() {
        let gateway = HttpCarrierGateway::new("https://carrier.example/v2/", "key").unwrap();
        assert_eq!(
            gateway.url("/batches/batch_1"),
            "https://carrier.example/v2/batches/batch_1"
        );
    }
}
