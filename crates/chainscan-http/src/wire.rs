//! JSON shapes of the node API and their conversion into core types.
//!
//! The node is loose about JSON types: numbers may arrive as strings and
//! strings as numbers, so every field is read leniently.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use chainscan_core::types::{Block, Transaction};

use crate::error::NodeError;

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| de::Error::custom(format!("invalid integer {n}"))),
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected integer, got {other}"))),
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = lenient_i64(d)?;
    u64::try_from(v).map_err(de::Error::custom)
}

#[derive(Debug, Deserialize)]
struct WireHeight {
    #[serde(rename = "BlockHeight", default, deserialize_with = "lenient_u64")]
    block_height: u64,
}

#[derive(Debug, Deserialize)]
struct WireBalance {
    #[serde(rename = "AssetBalance", default, deserialize_with = "lenient_string")]
    asset_balance: String,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(default, deserialize_with = "lenient_string")]
    blockhash: String,
    #[serde(default, deserialize_with = "lenient_string")]
    parenthash: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    time: u64,
    #[serde(rename = "Content", default)]
    content: Option<Vec<WireTransaction>>,
}

#[derive(Debug, Deserialize)]
struct WireTransaction {
    #[serde(default, deserialize_with = "lenient_string")]
    hash: String,
    #[serde(default, deserialize_with = "lenient_string")]
    fromtoken: String,
    #[serde(default, deserialize_with = "lenient_string")]
    totoken: String,
    #[serde(default, deserialize_with = "lenient_string")]
    amount: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    time: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    note: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    height: u64,
    #[serde(default, deserialize_with = "lenient_string")]
    blockhash: String,
}

impl WireTransaction {
    fn into_transaction(self) -> Transaction {
        Transaction {
            tx_id: self.hash,
            from_address: self.fromtoken,
            to_address: self.totoken,
            amount: self.amount,
            time: self.time,
            note: self.note,
            block_height: self.height,
            block_hash: self.blockhash,
        }
    }
}

/// Fail on a non-zero `errCode`, formatted as `[code]Msg`.
pub fn check_error(body: &Value) -> Result<(), NodeError> {
    let code = match body.get("errCode") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        Some(_) => -1,
    };
    if code == 0 {
        return Ok(());
    }
    let msg = match body.get("Msg") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Err(NodeError::Api { code, msg })
}

fn decode<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, NodeError> {
    serde_json::from_value(body).map_err(|e| NodeError::Decode(e.to_string()))
}

/// Parse a `GetBlockHeight` response.
pub fn parse_height(body: Value) -> Result<u64, NodeError> {
    Ok(decode::<WireHeight>(body)?.block_height)
}

/// Parse a `GetAssetBalanceAds` response. The balance must be a plain decimal.
pub fn parse_balance(body: Value) -> Result<String, NodeError> {
    let balance = decode::<WireBalance>(body)?.asset_balance.trim().to_string();
    if !is_decimal(&balance) {
        return Err(NodeError::Decode(format!("invalid balance {balance:?}")));
    }
    Ok(balance)
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    match digits.split_once('.') {
        Some((int, frac)) => all_digits(int) && all_digits(frac),
        None => all_digits(digits),
    }
}

/// Parse a `GetTransactionRecordHight` response for `height`.
///
/// The node does not echo the height, and its transactions carry neither
/// height nor hash, so both are filled in from the block.
pub fn parse_block(height: u64, body: Value) -> Result<Block, NodeError> {
    let wire: WireBlock = decode(body)?;
    let transactions = wire
        .content
        .unwrap_or_default()
        .into_iter()
        .map(|t| {
            let mut tx = t.into_transaction();
            tx.block_height = height;
            tx.block_hash = wire.blockhash.clone();
            tx
        })
        .collect();
    Ok(Block {
        height,
        hash: wire.blockhash,
        parent_hash: wire.parenthash,
        time: wire.time,
        transactions,
    })
}

/// Parse a `GetTransactionRecordHash` response: the first entry of `Content`.
pub fn parse_transaction(hash: &str, body: Value) -> Result<Transaction, NodeError> {
    let wire: WireBlock = decode(body)?;
    wire.content
        .and_then(|txs| txs.into_iter().next())
        .map(WireTransaction::into_transaction)
        .ok_or_else(|| NodeError::NotFound(format!("can not find tx: {hash}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_code_zero_is_ok() {
        assert!(check_error(&json!({"errCode": 0, "BlockHeight": 5})).is_ok());
        assert!(check_error(&json!({"BlockHeight": 5})).is_ok());
        assert!(check_error(&json!({"errCode": "0"})).is_ok());
    }

    #[test]
    fn error_code_nonzero_is_formatted() {
        let err = check_error(&json!({"errCode": 1, "Msg": "地址有误", "AllAsset": ""})).unwrap_err();
        assert_eq!(err.to_string(), "[1]地址有误");
    }

    #[test]
    fn height_accepts_string_numbers() {
        assert_eq!(parse_height(json!({"errCode": 0, "BlockHeight": 1024})).unwrap(), 1024);
        assert_eq!(parse_height(json!({"errCode": 0, "BlockHeight": "1025"})).unwrap(), 1025);
    }

    #[test]
    fn block_with_transactions() {
        let body = json!({
            "errCode": 0,
            "blockhash": "0xb2",
            "parenthash": "0xb1",
            "time": "1560000000",
            "Content": [
                {"hash": "t1", "fromtoken": "A", "totoken": "B", "amount": "1.5", "time": 1560000000, "note": "hi"},
                {"hash": "t2", "fromtoken": "B", "totoken": "C", "amount": 2, "time": "1560000001"}
            ]
        });
        let block = parse_block(77, body).unwrap();
        assert_eq!(block.height, 77);
        assert_eq!(block.hash, "0xb2");
        assert_eq!(block.parent_hash, "0xb1");
        assert_eq!(block.time, 1_560_000_000);
        assert_eq!(block.transactions.len(), 2);

        let t1 = &block.transactions[0];
        assert_eq!((t1.tx_id.as_str(), t1.amount.as_str(), t1.note.as_str()), ("t1", "1.5", "hi"));
        assert_eq!((t1.block_height, t1.block_hash.as_str()), (77, "0xb2"));
        let t2 = &block.transactions[1];
        assert_eq!(t2.amount, "2");
        assert_eq!(t2.time, 1_560_000_001);
        assert!(t2.note.is_empty());
    }

    #[test]
    fn block_with_null_content_is_empty() {
        let block = parse_block(3, json!({"blockhash": "x", "parenthash": "w", "time": 1, "Content": null})).unwrap();
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn transaction_by_hash() {
        let body = json!({"errCode": 0, "Content": [{"hash": "t9", "fromtoken": "A", "totoken": "B", "amount": "3"}]});
        let tx = parse_transaction("t9", body).unwrap();
        assert_eq!(tx.tx_id, "t9");
        assert_eq!(tx.to_address, "B");

        let err = parse_transaction("t0", json!({"errCode": 0, "Content": []})).unwrap_err();
        assert_eq!(err.to_string(), "can not find tx: t0");
    }

    #[test]
    fn balance_is_read_leniently() {
        assert_eq!(parse_balance(json!({"errCode": 0, "AssetBalance": "10.5"})).unwrap(), "10.5");
        assert_eq!(parse_balance(json!({"errCode": 0, "AssetBalance": 7})).unwrap(), "7");
        assert!(matches!(
            parse_balance(json!({"errCode": 0, "AssetBalance": ""})),
            Err(NodeError::Decode(_))
        ));
        assert!(matches!(
            parse_balance(json!({"errCode": 0, "AssetBalance": "1.2.3"})),
            Err(NodeError::Decode(_))
        ));
        assert!(parse_balance(json!({"errCode": 0})).is_err());
    }

    #[test]
    fn garbage_time_is_a_decode_error() {
        let err = parse_block(1, json!({"blockhash": "x", "time": "soon"})).unwrap_err();
        assert!(matches!(err, NodeError::Decode(_)));
    }
}
