use uuid::Uuid;

#[derive(Debug, Ord, Eq, PartialEq, PartialOrd, Clone)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: Vec<CharacteristicProperty>,
    pub permissions: Vec<AttributePermission>,
}

impl Default for Characteristic {
    fn default() -> Self {
        Characteristic {
            uuid: Uuid::nil(),
            properties: vec![CharacteristicProperty::Read, CharacteristicProperty::Write],
            permissions: vec![
                AttributePermission::Readable,
                AttributePermission::Writeable,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialOrd, Ord, Eq, PartialEq)]
pub enum CharacteristicProperty {
    Read,
    WriteWithoutResponse,
    Write,
}

#[derive(Debug, Clone, Copy, Ord, PartialOrd, PartialEq, Eq)]
pub enum AttributePermission {
    Readable,
    Writeable,
}

#[derive(Debug, Clone, Copy, Default, PartialOrd, Ord, Eq, PartialEq)]
pub enum CharacteristicWriteType {
    WriteWithoutResponse,
    #[default]
    WriteWithResponse,
}

/// Part of `value` a read at `offset` returns: the suffix starting there,
/// empty once the offset reaches the end.
pub fn read_fragment(value: &[u8], offset: u64) -> &[u8] {
    usize::try_from(offset)
        .ok()
        .and_then(|offset| value.get(offset..))
        .unwrap_or(&[])
}
