use alloy::primitives::Address;

/// transfer(address,uint256)
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// transferFrom(address,address,uint256)
pub const TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

/// Pulls the recipient out of ERC20 transfer-style calldata. Anything that
/// is not a well-formed transfer/transferFrom payload yields `None`.
pub fn extract_recipient(data: &[u8]) -> Option<Address> {
    if data.len() < 4 {
        return None;
    }
    let selector: [u8; 4] = data[..4].try_into().ok()?;
    let payload = &data[4..];

    let word = match selector {
        TRANSFER_SELECTOR if payload.len() >= 64 => &payload[..32],
        TRANSFER_FROM_SELECTOR if payload.len() >= 96 => &payload[32..64],
        _ => return None,
    };

    // Addresses are right-aligned in their 32-byte slot; a non-zero prefix
    // means the slot does not hold an address.
    if word[..12].iter().any(|byte| *byte != 0) {
        return None;
    }
    Some(Address::from_slice(&word[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::{hex, primitives::address};

    fn transfer_calldata(recipient: &str, amount: u64) -> Vec<u8> {
        let mut data = TRANSFER_SELECTOR.to_vec();
        let mut slot = [0u8; 32];
        slot[12..].copy_from_slice(&hex::decode(recipient).unwrap());
        data.extend_from_slice(&slot);
        let mut value = [0u8; 32];
        value[24..].copy_from_slice(&amount.to_be_bytes());
        data.extend_from_slice(&value);
        data
    }

    #[test]
    fn extracts_transfer_recipient() {
        let data = transfer_calldata("8888888888888888888888888888888888888888", 1000);
        assert_eq!(
            extract_recipient(&data),
            Some(address!("8888888888888888888888888888888888888888"))
        );
    }

    #[test]
    fn extracts_transfer_from_recipient() {
        let mut data = TRANSFER_FROM_SELECTOR.to_vec();
        let mut from_slot = [0u8; 32];
        from_slot[12..].copy_from_slice(&[0x11; 20]);
        let mut to_slot = [0u8; 32];
        to_slot[12..].copy_from_slice(&[0x22; 20]);
        data.extend_from_slice(&from_slot);
        data.extend_from_slice(&to_slot);
        data.extend_from_slice(&[0u8; 32]);

        assert_eq!(
            extract_recipient(&data),
            Some(Address::from_slice(&[0x22; 20]))
        );
    }

    #[test]
    fn short_payload_yields_none() {
        let mut data = TRANSFER_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 32]);
        assert_eq!(extract_recipient(&data), None);
    }

    #[test]
    fn dirty_address_slot_yields_none() {
        let mut data = transfer_calldata("8888888888888888888888888888888888888888", 1);
        data[5] = 0xff;
        assert_eq!(extract_recipient(&data), None);
    }

    #[test]
    fn empty_and_foreign_selectors_yield_none() {
        assert_eq!(extract_recipient(&[]), None);
        let mut data = vec![0xde, 0xad, 0xbe, 0xef];
        data.extend_from_slice(&[0u8; 96]);
        assert_eq!(extract_recipient(&data), None);
    }
}
