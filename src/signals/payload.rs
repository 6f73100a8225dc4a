use serde::{Deserialize, Serialize};

/// TradingView alert webhook body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingViewSignalPayload {
    pub exchange: String,
    pub ticker: String,
    pub trade_type: String,
    pub order_type: String,
    pub quantity: i64,
    pub limitprice: f64,
    pub time: String,
    pub strategy: String,
    pub interval: String,
    #[serde(rename = "alertName")]
    pub alert_name: String,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
}

impl TradingViewSignalPayload {
    /// Every field value as text, in declaration order.
    pub fn field_values(&self) -> Vec<String> {
        vec![
            self.exchange.clone(),
            self.ticker.clone(),
            self.trade_type.clone(),
            self.order_type.clone(),
            self.quantity.to_string(),
            float_text(self.limitprice),
            self.time.clone(),
            self.strategy.clone(),
            self.interval.clone(),
            self.alert_name.clone(),
            float_text(self.open),
            float_text(self.close),
            float_text(self.high),
            float_text(self.low),
        ]
    }
}

/// `610.0` → "610.0", keeping the decimal point on whole numbers.
fn float_text(v: f64) -> String {
    format!("{:?}", v)
}

/// Indicator plots attached to HOTT buy alerts. Flags are 0/1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HottIndicators {
    pub buy_signal_strategy: i64,
    pub golden_cross: i64,
    pub valid_hott_crossover_signal: i64,
    pub atr: f64,
    pub utbot_buy: i64,
    pub valid_utbuy_candle: i64,
    pub valid_signal_candle: i64,
    pub is_high_volume: i64,
    pub ema_vwap_crossover: i64,
    pub ema_hott_crossover: i64,
    pub triple_crossover: i64,
    pub resistance_price: f64,
    pub resistance_breakout: i64,
    pub next_resistance_price: f64,
    pub enough_room_to_next_resistance: i64,
    pub latest_hott_value: f64,
    /// Bitmask
    pub breakout_flags: i64,
    pub breakout_count: i64,
}

/// HOTT buy alert: the base signal plus indicator values, all in one flat body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingViewHottPayload {
    #[serde(flatten)]
    pub signal: TradingViewSignalPayload,
    #[serde(flatten)]
    pub indicators: HottIndicators,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub stock_name: String,
    pub order_response: String,
}

impl AlertMessage {
    pub fn received(ticker: &str) -> Self {
        Self {
            stock_name: ticker.to_string(),
            order_response: "Received trading signal processing".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderResponse {
    pub status: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_json() -> serde_json::Value {
        json!({
            "exchange": "NSE",
            "ticker": "SBIN",
            "trade_type": "BUY",
            "order_type": "LIMIT",
            "quantity": 10,
            "limitprice": 612.5,
            "time": "2024-01-05T09:15:00Z",
            "strategy": "ORB",
            "interval": "15",
            "alertName": "ORB breakout",
            "open": 610.0,
            "close": 612.0,
            "high": 613.2,
            "low": 609.1
        })
    }

    #[test]
    fn test_base_payload_deserializes() {
        let p: TradingViewSignalPayload = serde_json::from_value(base_json()).unwrap();
        assert_eq!(p.alert_name, "ORB breakout");
        assert_eq!(p.quantity, 10);
        assert_eq!(p.field_values().len(), 14);
        assert_eq!(p.field_values()[5], "612.5");
    }

    #[test]
    fn test_whole_prices_keep_decimal_point() {
        let p: TradingViewSignalPayload = serde_json::from_value(base_json()).unwrap();
        let values = p.field_values();
        assert_eq!(values[4], "10");
        assert_eq!(values[10], "610.0");
        assert_eq!(values[11], "612.0");
        assert_eq!(values[13], "609.1");
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let mut body = base_json();
        body.as_object_mut().unwrap().remove("ticker");
        assert!(serde_json::from_value::<TradingViewSignalPayload>(body).is_err());
    }

    #[test]
    fn test_hott_payload_is_flat() {
        let mut body = base_json();
        let extra = json!({
            "buy_signal_strategy": 2, "golden_cross": 1, "valid_hott_crossover_signal": 1,
            "atr": 4.25, "utbot_buy": 1, "valid_utbuy_candle": 0, "valid_signal_candle": 1,
            "is_high_volume": 0, "ema_vwap_crossover": 1, "ema_hott_crossover": 0,
            "triple_crossover": 0, "resistance_price": 615.0, "resistance_breakout": 0,
            "next_resistance_price": 630.0, "enough_room_to_next_resistance": 1,
            "latest_hott_value": 608.4, "breakout_flags": 5, "breakout_count": 2
        });
        body.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());

        let p: TradingViewHottPayload = serde_json::from_value(body).unwrap();
        assert_eq!(p.signal.ticker, "SBIN");
        assert_eq!(p.indicators.breakout_flags, 5);
        assert_eq!(p.indicators.atr, 4.25);
    }
}
