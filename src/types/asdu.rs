//! IEC 60870-5-104 ASDU (Application Service Data Unit).
//!
//! An ASDU carries one type identification and up to 127 information
//! objects. Objects are kept in their encoded form: outbound ASDUs append
//! to the payload as objects are added, inbound ASDUs keep the received
//! payload and decode elements on demand.

use bytes::{BufMut, Bytes, BytesMut};

use super::apci::MAX_ASDU_LENGTH;
use super::cot::Cot;
use super::object::{catalog_entry, read_address, InformationObject};
use super::type_id::TypeId;
use crate::error::{Iec104Error, Result};
use crate::parameters::ConnectionParameters;

/// Maximum number of information objects in one ASDU.
pub const MAX_ELEMENTS: u8 = 127;

/// Variable Structure Qualifier (VSQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vsq {
    /// Number of information objects (0-127)
    pub count: u8,
    /// If true, addresses are sequential (SQ=1)
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// Application Service Data Unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    params: ConnectionParameters,
    type_id: u8,
    vsq: Vsq,
    cot: Cot,
    test: bool,
    negative: bool,
    originator: u8,
    common_address: u16,
    payload: BytesMut,
}

impl Asdu {
    /// Create an empty non-sequence ASDU.
    ///
    /// The originator address is taken from `params`. The type
    /// identification is fixed by the first information object added.
    pub fn new(params: &ConnectionParameters, cot: Cot, common_address: u16) -> Self {
        Self {
            params: *params,
            type_id: 0,
            vsq: Vsq::default(),
            cot,
            test: false,
            negative: false,
            originator: params.originator_address,
            common_address,
            payload: BytesMut::new(),
        }
    }

    /// Pack elements as a sequence (SQ=1). Only effective on an empty ASDU.
    pub fn with_sequence(mut self, sequence: bool) -> Self {
        if self.vsq.count == 0 {
            self.vsq.sequence = sequence;
        }
        self
    }

    /// Set the test flag.
    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Set the negative confirmation flag.
    pub fn with_negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }

    /// Set the originator address.
    pub fn with_originator(mut self, originator: u8) -> Self {
        self.originator = originator;
        self
    }

    /// Replace the cause of transmission.
    pub fn with_cot(mut self, cot: Cot) -> Self {
        self.cot = cot;
        self
    }

    /// Replace the cause of transmission in place.
    #[inline]
    pub fn set_cot(&mut self, cot: Cot) {
        self.cot = cot;
    }

    /// Set or clear the negative confirmation flag.
    #[inline]
    pub fn set_negative(&mut self, negative: bool) {
        self.negative = negative;
    }

    /// Set or clear the test flag.
    #[inline]
    pub fn set_test(&mut self, test: bool) {
        self.test = test;
    }

    /// Type identification, `None` if empty or not a supported type.
    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        TypeId::from_u8(self.type_id).ok()
    }

    /// Raw type identification byte.
    #[inline]
    pub fn raw_type_id(&self) -> u8 {
        self.type_id
    }

    /// Cause of transmission.
    #[inline]
    pub fn cot(&self) -> Cot {
        self.cot
    }

    /// Test flag (T).
    #[inline]
    pub fn is_test(&self) -> bool {
        self.test
    }

    /// Negative confirmation flag (P/N).
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Originator address (0 when COT is one byte wide).
    #[inline]
    pub fn originator_address(&self) -> u8 {
        self.originator
    }

    /// Common address of ASDU.
    #[inline]
    pub fn common_address(&self) -> u16 {
        self.common_address
    }

    /// Whether elements are packed as a sequence (SQ=1).
    #[inline]
    pub fn is_sequence(&self) -> bool {
        self.vsq.sequence
    }

    /// Number of information objects.
    #[inline]
    pub fn number_of_elements(&self) -> usize {
        self.vsq.count as usize
    }

    /// Encoded information objects.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Parameters this ASDU is encoded with.
    #[inline]
    pub fn parameters(&self) -> &ConnectionParameters {
        &self.params
    }

    /// Append an information object.
    ///
    /// Returns false without modifying the ASDU when the object does not
    /// fit: the encoded ASDU would exceed 249 bytes, the ASDU already holds
    /// 127 objects, the type differs from earlier objects, or (for sequence
    /// ASDUs) the type cannot be packed as a sequence or the address is not
    /// the next consecutive one.
    pub fn add_information_object(&mut self, io: &InformationObject) -> bool {
        let type_id = io.type_id().as_u8();
        let count = self.vsq.count;

        if count > 0 && type_id != self.type_id {
            return false;
        }
        if count >= MAX_ELEMENTS {
            return false;
        }

        let with_address = !(self.vsq.sequence && count > 0);
        if self.vsq.sequence {
            if !io.supports_sequence() {
                return false;
            }
            if count > 0 {
                match read_address(&self.params, &self.payload) {
                    Ok(first) if io.address == first.wrapping_add(count as u32) => {}
                    _ => return false,
                }
            }
        }

        if self.encoded_len() + io.encoded_size(&self.params, with_address) > MAX_ASDU_LENGTH {
            return false;
        }

        io.encode(&self.params, &mut self.payload, with_address);
        self.type_id = type_id;
        self.vsq.count += 1;
        true
    }

    /// Decode the information object at `index`.
    pub fn element(&self, index: usize) -> Result<InformationObject> {
        let type_id = TypeId::from_u8(self.type_id)?;
        let size = catalog_entry(type_id)?.size;
        let ioa = self.params.size_of_ioa;

        if index >= self.number_of_elements() {
            return Err(Iec104Error::parsing(format!(
                "element index {} out of bounds ({} elements)",
                index,
                self.number_of_elements()
            )));
        }

        if self.vsq.sequence && index > 0 {
            let first = read_address(&self.params, &self.payload)?;
            let offset = ioa + index * size;
            let buf = self.payload.get(offset..).unwrap_or_default();
            InformationObject::decode(
                type_id,
                &self.params,
                buf,
                Some(first.wrapping_add(index as u32)),
            )
        } else {
            let offset = index * (ioa + size);
            let buf = self.payload.get(offset..).unwrap_or_default();
            InformationObject::decode(type_id, &self.params, buf, None)
        }
    }

    /// Decode all information objects in order.
    pub fn elements(&self) -> impl Iterator<Item = Result<InformationObject>> + '_ {
        (0..self.number_of_elements()).map(move |index| self.element(index))
    }

    /// Parse an ASDU received with `params`.
    ///
    /// Unsupported type identifications and unassigned causes are kept raw
    /// so they can be answered with a negative confirmation. For supported types the
    /// payload length must match the element count exactly.
    pub fn parse(params: &ConnectionParameters, data: &[u8]) -> Result<Self> {
        let header_size = params.header_size();
        if data.len() < header_size {
            return Err(Iec104Error::parsing(format!(
                "ASDU needs {} header bytes, got {}",
                header_size,
                data.len()
            )));
        }

        let type_id = data[0];
        let vsq = Vsq::from_u8(data[1]);
        let cot = Cot::from_raw(data[2]);
        let test = data[2] & 0x80 != 0;
        let negative = data[2] & 0x40 != 0;

        let mut pos = 3;
        let originator = if params.size_of_cot == 2 {
            pos += 1;
            data[3]
        } else {
            0
        };
        let common_address = if params.size_of_ca == 2 {
            u16::from_le_bytes([data[pos], data[pos + 1]])
        } else {
            data[pos] as u16
        };

        let payload = &data[header_size..];
        if let Ok(known) = TypeId::from_u8(type_id) {
            let size = catalog_entry(known)?.size;
            let count = vsq.count as usize;
            let ioa = params.size_of_ioa;
            let expected = match (count, vsq.sequence) {
                (0, _) => 0,
                (n, true) => ioa + n * size,
                (n, false) => n * (ioa + size),
            };
            if payload.len() != expected {
                return Err(Iec104Error::parsing(format!(
                    "{} with {} elements needs {} payload bytes, got {}",
                    known.standard_name(),
                    count,
                    expected,
                    payload.len()
                )));
            }
        }

        Ok(Self {
            params: *params,
            type_id,
            vsq,
            cot,
            test,
            negative,
            originator,
            common_address,
            payload: BytesMut::from(payload),
        })
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.params.header_size() + self.payload.len()
    }

    /// Append the encoded ASDU to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.type_id);
        buf.put_u8(self.vsq.as_u8());

        let mut cot_byte = self.cot.as_u8();
        if self.test {
            cot_byte |= 0x80;
        }
        if self.negative {
            cot_byte |= 0x40;
        }
        buf.put_u8(cot_byte);
        if self.params.size_of_cot == 2 {
            buf.put_u8(self.originator);
        }

        if self.params.size_of_ca == 2 {
            buf.put_u16_le(self.common_address);
        } else {
            buf.put_u8(self.common_address as u8);
        }
        buf.extend_from_slice(&self.payload);
    }

    /// Encode into a new buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl std::fmt::Display for Asdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.type_id() {
            Some(type_id) => write!(f, "{}", type_id.standard_name())?,
            None => write!(f, "type {}", self.type_id)?,
        }
        write!(
            f,
            " COT={} CA={} n={}",
            self.cot,
            self.common_address,
            self.vsq.count
        )?;
        if self.vsq.sequence {
            write!(f, " SQ")?;
        }
        if self.negative {
            write!(f, " NEG")?;
        }
        if self.test {
            write!(f, " TEST")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::elements::{MeasuredScaled, SinglePointInformation};
    use crate::types::object::InformationElement;
    use crate::types::quality::QualityDescriptor;
    use crate::types::time::Cp24Time2a;
    use crate::types::values::ScaledValue;

    fn single_point(address: u32, value: bool) -> InformationObject {
        InformationObject::new(
            address,
            InformationElement::SinglePoint(SinglePointInformation::new(value)),
        )
    }

    fn single_point_cp24(address: u32) -> InformationObject {
        InformationObject::new(
            address,
            InformationElement::SinglePointCp24(
                SinglePointInformation::new(true),
                Cp24Time2a::new(1, 2, 3),
            ),
        )
    }

    #[test]
    fn test_vsq_roundtrip() {
        let vsq = Vsq::new(127, true);
        assert_eq!(vsq.as_u8(), 0xFF);
        assert_eq!(Vsq::from_u8(0xFF), vsq);
        assert_eq!(Vsq::from_u8(0x05), Vsq::new(5, false));
    }

    #[test]
    fn test_packing_limit_non_sequence() {
        // 6 header bytes, 7 bytes per object: 34 * 7 = 238 <= 243
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::Spontaneous, 1);

        for i in 0..34 {
            assert!(asdu.add_information_object(&single_point_cp24(100 + i)), "object {}", i);
        }
        assert!(!asdu.add_information_object(&single_point_cp24(200)));
        assert_eq!(asdu.number_of_elements(), 34);
        assert_eq!(asdu.encoded_len(), 6 + 34 * 7);
    }

    #[test]
    fn test_sequence_gap_rejected() {
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::Periodic, 1).with_sequence(true);

        assert!(asdu.add_information_object(&single_point(100, true)));
        assert!(asdu.add_information_object(&single_point(101, false)));
        assert!(asdu.add_information_object(&single_point(102, true)));
        assert!(!asdu.add_information_object(&single_point(104, true)));
        assert_eq!(asdu.number_of_elements(), 3);

        // first address plus two one-byte elements
        assert_eq!(asdu.payload(), &[100, 0, 0, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_sequence_rejects_unsupported_type() {
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::Spontaneous, 1).with_sequence(true);
        assert!(!asdu.add_information_object(&single_point_cp24(1)));
        assert_eq!(asdu.number_of_elements(), 0);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::Spontaneous, 1);
        assert!(asdu.add_information_object(&single_point(1, true)));

        let before = asdu.clone();
        assert!(!asdu.add_information_object(&single_point_cp24(2)));
        assert_eq!(asdu, before);
    }

    #[test]
    fn test_element_count_limit() {
        // 127 single points in a sequence take 3 + 127 bytes, well within budget
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::InterrogatedByStation, 1).with_sequence(true);
        for i in 0..127 {
            assert!(asdu.add_information_object(&single_point(i, i % 2 == 0)));
        }
        assert!(!asdu.add_information_object(&single_point(127, true)));
        assert_eq!(asdu.number_of_elements(), 127);
    }

    #[test]
    fn test_encode_header_layout() {
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::Activation, 0x0102)
            .with_originator(7)
            .with_test(true)
            .with_negative(true);
        assert!(asdu.add_information_object(&InformationObject::new(
            0,
            InformationElement::Interrogation(20)
        )));

        assert_eq!(
            asdu.to_bytes().to_vec(),
            vec![100, 0x01, 0xC6, 7, 0x02, 0x01, 0, 0, 0, 20]
        );
    }

    #[test]
    fn test_encode_narrow_fields() {
        let params = ConnectionParameters::default()
            .size_of_cot(1)
            .size_of_ca(1)
            .size_of_ioa(2);
        let mut asdu = Asdu::new(&params, Cot::Activation, 5);
        assert!(asdu.add_information_object(&InformationObject::new(
            0x0203,
            InformationElement::Interrogation(20)
        )));

        let bytes = asdu.to_bytes();
        assert_eq!(bytes.to_vec(), vec![100, 0x01, 0x06, 5, 0x03, 0x02, 20]);

        let parsed = Asdu::parse(&params, &bytes).unwrap();
        assert_eq!(parsed.common_address(), 5);
        assert_eq!(parsed.originator_address(), 0);
        assert_eq!(parsed.element(0).unwrap().address, 0x0203);
    }

    #[test]
    fn test_parse_and_decode_elements() {
        let params = ConnectionParameters::default();
        let mut asdu = Asdu::new(&params, Cot::InterrogatedByStation, 1).with_sequence(true);
        for i in 0..3 {
            let io = InformationObject::new(
                1000 + i,
                InformationElement::MeasuredScaled(MeasuredScaled {
                    value: ScaledValue::new(i as i32 * 10),
                    quality: QualityDescriptor::default(),
                }),
            );
            assert!(asdu.add_information_object(&io));
        }

        let parsed = Asdu::parse(&params, &asdu.to_bytes()).unwrap();
        assert_eq!(parsed, asdu);
        assert_eq!(parsed.type_id(), Some(TypeId::MeasuredScaled));
        assert!(parsed.is_sequence());

        let objects: Vec<_> = parsed.elements().collect::<Result<_>>().unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[2].address, 1002);
        match objects[2].element {
            InformationElement::MeasuredScaled(mv) => assert_eq!(mv.value.value(), 20),
            other => panic!("unexpected element {:?}", other),
        }

        assert!(parsed.element(3).is_err());
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let params = ConnectionParameters::default();
        // C_IC_NA_1 with one object but the qualifier byte missing
        let data = [100, 0x01, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Asdu::parse(&params, &data),
            Err(Iec104Error::Parsing(_))
        ));
        assert!(Asdu::parse(&params, &data[..4]).is_err());
    }

    #[test]
    fn test_parse_unknown_type_kept_raw() {
        let params = ConnectionParameters::default();
        let data = [120, 0x01, 0x06, 0x00, 0x01, 0x00, 0xAA, 0xBB];
        let asdu = Asdu::parse(&params, &data).unwrap();

        assert_eq!(asdu.type_id(), None);
        assert_eq!(asdu.raw_type_id(), 120);
        assert!(matches!(asdu.element(0), Err(Iec104Error::UnknownTypeId(120))));
        assert_eq!(asdu.to_bytes().to_vec(), data.to_vec());
    }

    #[test]
    fn test_parse_unassigned_cot() {
        let params = ConnectionParameters::default();
        let data = [100, 0x01, 0x3F, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 20];
        let asdu = Asdu::parse(&params, &data).unwrap();

        assert_eq!(asdu.cot(), Cot::Other(63));
        assert_eq!(asdu.to_bytes().to_vec(), data.to_vec());
    }

    #[test]
    fn test_cot_rewrite() {
        let params = ConnectionParameters::default();
        let data = [104, 0x01, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0xAA, 0x55];
        let mut asdu = Asdu::parse(&params, &data).unwrap();

        asdu.set_cot(Cot::ActivationConfirm);
        asdu.set_negative(true);
        assert_eq!(asdu.to_bytes()[2], 0x47);

        let echoed = asdu.with_cot(Cot::UnknownCot);
        assert_eq!(echoed.cot(), Cot::UnknownCot);
        assert!(echoed.is_negative());
        assert!(echoed.to_string().starts_with("C_TS_NA_1 COT=UnknownCot"));
    }
}
