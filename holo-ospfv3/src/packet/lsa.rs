//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use holo_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF, prefix_wire_len};
use ipnetwork::Ipv6Network;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_INIT_SEQ_NO, LSA_MAX_AGE, LSA_RESERVED_SEQ_NO};
use crate::packet::Options;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};

// The PrefixOptions Field.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-4
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct PrefixOptions: u8 {
        const NU = 0x01;
        const LA = 0x02;
        const P = 0x08;
        const DN = 0x10;
        const N = 0x20;
    }
}

// LSA type: U-bit, flooding scope and function code packed into 16 bits.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u16);

// LSA flooding scope.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaScope {
    Link,
    Area,
    As,
    Unknown,
}

// On-wire scope code.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaScopeCode {
    Link = 0x0000,
    Area = 0x2000,
    As = 0x4000,
    Reserved = 0x6000,
}

// LSA function code.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-3
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaFunctionCode {
    Router = 1,
    Network = 2,
    InterAreaPrefix = 3,
    InterAreaRouter = 4,
    AsExternal = 5,
    Nssa = 7,
    Link = 8,
    IntraAreaPrefix = 9,
}

// LSA key. It serves both as a global LSA identifier and as a key to store
// LSAs in an LSDB.
//
// Please be aware that modifying the order of the fields will impact operations
// such as iterating over LSDBs.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

//
// LSA header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           LS Age              |           LS Type             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Link State ID                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Advertising Router                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    LS Sequence Number                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        LS Checksum            |             Length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// Complete LSA: header, decoded body and the encoded bytes they came from.
//
// The raw bytes are kept in sync with the header, so that content comparison
// and checksum verification never require re-encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    #[serde(skip)]
    pub raw: Bytes,
    pub hdr: LsaHdr,
    pub body: LsaBody,
}

#[derive(Clone, Debug, Eq, PartialEq, EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    InterAreaPrefix(LsaInterAreaPrefix),
    InterAreaRouter(LsaInterAreaRouter),
    AsExternal(LsaAsExternal),
    Nssa(LsaAsExternal),
    Link(LsaLink),
    IntraAreaPrefix(LsaIntraAreaPrefix),
    Unknown(LsaUnknown),
}

//
// Router-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+--+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  0  |Nt|x|V|E|B|            Options                            |
// +-+-+-+--+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type       |       0       |          Metric               |
// +-+-+-+--+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Interface ID                              |
// +-+-+-+--+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Neighbor Interface ID                        |
// +-+-+-+--+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Neighbor Router ID                          |
// +-+-+-+--+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             ...                                |
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub options: Options,
    pub links: Vec<LsaRouterLink>,
}

// Router Properties.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv3-parameters/ospfv3-parameters.xhtml#ospfv3-parameters-7
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
        const NT = 0x10;
    }
}

// Router-LSA link types.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 0x01,
    TransitNetwork = 0x02,
    VirtualLink = 0x04,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub metric: u16,
    pub iface_id: u32,
    pub nbr_iface_id: u32,
    pub nbr_router_id: Ipv4Addr,
}

//
// Network-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |       0       |              Options                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Attached Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             ...                               |
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub options: Options,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

//
// Inter-Area-Prefix-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |       0       |                  Metric                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | PrefixLength  | PrefixOptions |              0                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Address Prefix                         |
// |                             ...                               |
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaInterAreaPrefix {
    pub metric: u32,
    pub prefix_options: PrefixOptions,
    pub prefix: Ipv6Network,
}

//
// Inter-Area-Router-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |       0       |                 Options                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |       0       |                 Metric                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                 Destination Router ID                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaInterAreaRouter {
    pub options: Options,
    pub metric: u32,
    pub router_id: Ipv4Addr,
}

//
// AS-External-LSA (also used for NSSA-LSAs).
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         |E|F|T|                Metric                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | PrefixLength  | PrefixOptions |     Referenced LS Type        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Address Prefix                         |
// |                             ...                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Forwarding Address (Optional)                  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              External Route Tag (Optional)                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |               Referenced Link State ID (Optional)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub prefix_options: PrefixOptions,
    pub prefix: Ipv6Network,
    pub fwd_addr: Option<Ipv6Addr>,
    pub tag: Option<u32>,
    pub ref_lsa_type: Option<LsaType>,
    pub ref_lsa_id: Option<Ipv4Addr>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const T = 0x01;
        const F = 0x02;
        const E = 0x04;
    }
}

//
// Link-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Rtr Priority  |                Options                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +-                                                             -+
// |                                                               |
// +-                Link-local Interface Address                 -+
// |                                                               |
// +-                                                             -+
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         # prefixes                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  PrefixLength | PrefixOptions |             0                 |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                Address Prefix                                 |
// |                             ...                               |
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaLink {
    pub priority: u8,
    pub options: Options,
    pub linklocal: Ipv6Addr,
    pub prefixes: Vec<LsaLinkPrefix>,
}

#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaLinkPrefix {
    pub options: PrefixOptions,
    pub value: Ipv6Network,
}

//
// Intra-Area-Prefix-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         # Prefixes            |     Referenced LS Type        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                  Referenced Link State ID                     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |               Referenced Advertising Router                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  PrefixLength | PrefixOptions |          Metric               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Address Prefix                          |
// |                             ...                               |
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaIntraAreaPrefix {
    pub ref_lsa_type: LsaType,
    pub ref_lsa_id: Ipv4Addr,
    pub ref_adv_rtr: Ipv4Addr,
    pub prefixes: Vec<LsaIntraAreaPrefixEntry>,
}

#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaIntraAreaPrefixEntry {
    pub options: PrefixOptions,
    pub value: Ipv6Network,
    pub metric: u16,
}

// LSA of unrecognized type. Its body is only available through the raw
// bytes of the enclosing LSA.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaUnknown {}

// ===== impl LsaType =====

impl LsaType {
    pub const U_BIT_MASK: u16 = 0x8000;
    pub const SCOPE_MASK: u16 = 0x6000;
    pub const FUNCTION_CODE_MASK: u16 = 0x1fff;

    pub const ROUTER: LsaType = LsaType(0x2001);
    pub const NETWORK: LsaType = LsaType(0x2002);
    pub const INTER_AREA_PREFIX: LsaType = LsaType(0x2003);
    pub const INTER_AREA_ROUTER: LsaType = LsaType(0x2004);
    pub const AS_EXTERNAL: LsaType = LsaType(0x4005);
    pub const NSSA: LsaType = LsaType(0x2007);
    pub const LINK: LsaType = LsaType(0x0008);
    pub const INTRA_AREA_PREFIX: LsaType = LsaType(0x2009);

    pub fn u_bit(&self) -> bool {
        self.0 & Self::U_BIT_MASK != 0
    }

    pub fn scope_code(&self) -> LsaScopeCode {
        LsaScopeCode::from_u16(self.0 & Self::SCOPE_MASK)
            .unwrap_or(LsaScopeCode::Reserved)
    }

    pub fn function_code(&self) -> Option<LsaFunctionCode> {
        LsaFunctionCode::from_u16(self.0 & Self::FUNCTION_CODE_MASK)
    }

    // Returns the flooding scope of the LSA type.
    //
    // Unknown LSA types with the U-bit clear are treated as having link-local
    // flooding scope (RFC 5340, Section 4.5.2).
    pub fn scope(&self) -> LsaScope {
        if self.function_code().is_none() && !self.u_bit() {
            return LsaScope::Link;
        }
        match self.scope_code() {
            LsaScopeCode::Link => LsaScope::Link,
            LsaScopeCode::Area => LsaScope::Area,
            LsaScopeCode::As => LsaScope::As,
            LsaScopeCode::Reserved => LsaScope::Unknown,
        }
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.function_code() {
            Some(code) => write!(f, "{code:?}"),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

impl From<LsaType> for u16 {
    fn from(lsa_type: LsaType) -> u16 {
        lsa_type.0
    }
}

// ===== impl LsaKey =====

impl std::fmt::Display for LsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.lsa_type, self.adv_rtr, self.lsa_id)
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub fn new(
        age: u16,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> Self {
        LsaHdr {
            age,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.remaining() as u16));
        }
        let age = buf.get_u16();
        let lsa_type = LsaType(buf.get_u16());
        let lsa_id = buf.get_ipv4();
        let adv_rtr = buf.get_ipv4();
        let seq_no = buf.get_u32();
        let cksum = buf.get_u16();
        let length = buf.get_u16();

        Ok(LsaHdr {
            age,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum,
            length,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u16(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub fn key(&self) -> LsaKey {
        LsaKey {
            lsa_type: self.lsa_type,
            adv_rtr: self.adv_rtr,
            lsa_id: self.lsa_id,
        }
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }
}

// ===== impl Lsa =====

impl Lsa {
    // LSA maximum length
    //
    // Opt for a conservative value to avoid packet fragmentation even in
    // low-MTU links.
    pub const MAX_LENGTH: usize = 1024;

    pub fn new(
        age: u16,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Self {
        // Build LSA header (the length and checksum are computed later).
        let hdr = LsaHdr::new(age, body.lsa_type(), lsa_id, adv_rtr, seq_no);

        let mut lsa = Lsa {
            raw: Default::default(),
            hdr,
            body,
        };
        lsa.encode();
        lsa
    }

    pub fn age(&self) -> u16 {
        self.hdr.age
    }

    // Updates the LSA age, both in the header and in the raw data.
    pub fn set_age(&mut self, age: u16) {
        self.hdr.age = age;

        let mut raw = BytesMut::from(self.raw.as_ref());
        if raw.len() >= 2 {
            raw[0..2].copy_from_slice(&age.to_be_bytes());
        }
        self.raw = raw.freeze();
    }

    pub fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    // Returns whether this is a placeholder LSA used to restart a sequence
    // number space.
    pub fn is_initial_seqno(&self) -> bool {
        self.hdr.seq_no == LSA_INIT_SEQ_NO
    }

    // Decodes LSA from a bytes buffer.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let buf_orig = buf.clone();
        let hdr = LsaHdr::decode(buf)?;
        let lsa_len = hdr.length;
        if lsa_len < LsaHdr::LENGTH {
            return Err(DecodeError::InvalidLsaLength);
        }
        let lsa_body_len = (lsa_len - LsaHdr::LENGTH) as usize;
        if buf.remaining() < lsa_body_len {
            return Err(DecodeError::InvalidLsaLength);
        }
        let mut buf_lsa = buf.copy_to_bytes(lsa_body_len);
        let body = LsaBody::decode(hdr.lsa_type, &mut buf_lsa)?;

        Ok(Lsa {
            raw: buf_orig.slice(0..lsa_len as usize),
            hdr,
            body,
        })
    }

    // Encodes LSA, refreshing its length, checksum and raw data.
    pub(crate) fn encode(&mut self) {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            self.body.encode(&mut buf);

            // Rewrite LSA length.
            let lsa_len = buf.len() as u16;
            buf[18..20].copy_from_slice(&lsa_len.to_be_bytes());
            self.hdr.length = lsa_len;

            // Compute LSA checksum.
            let cksum = Self::checksum(&buf[2..(lsa_len as usize)]);
            buf[16..18].copy_from_slice(&cksum);
            self.hdr.cksum = u16::from_be_bytes(cksum);

            self.raw = buf.clone().freeze();
        });
    }

    pub(crate) fn validate(&self) -> Result<(), LsaValidationError> {
        if self.hdr.age > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }
        if self.hdr.lsa_type.scope() == LsaScope::Unknown {
            return Err(LsaValidationError::InvalidLsaScope);
        }
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }

        Ok(())
    }

    // ISO 8473 Fletcher checksum, with the check bytes placed at offset 16 of
    // the LSA (offset 14 of the checksummed data).
    fn checksum(data: &[u8]) -> [u8; 2] {
        let checksum = fletcher::calc_fletcher16(data);
        let mut checkbyte0 = (checksum & 0x00FF) as i32;
        let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

        let sop = data.len() as u16 - 15;
        let mut x = (sop as i32 * checkbyte0 - checkbyte1) % 255;
        if x <= 0 {
            x += 255;
        }
        checkbyte1 = 510 - checkbyte0 - x;
        if checkbyte1 > 255 {
            checkbyte1 -= 255;
        }
        checkbyte0 = x;
        [checkbyte0 as u8, checkbyte1 as u8]
    }

    // Checks if the checksum is valid. The Age field is not covered.
    fn is_checksum_valid(&self) -> bool {
        let len = self.hdr.length as usize;
        if self.raw.len() < len || len < LsaHdr::LENGTH as usize {
            return false;
        }
        fletcher::calc_fletcher16(&self.raw[2..len]) == 0
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    fn decode(lsa_type: LsaType, buf: &mut Bytes) -> DecodeResult<Self> {
        let lsa = match lsa_type.function_code() {
            Some(LsaFunctionCode::Router) => {
                LsaBody::Router(LsaRouter::decode(buf)?)
            }
            Some(LsaFunctionCode::Network) => {
                LsaBody::Network(LsaNetwork::decode(buf)?)
            }
            Some(LsaFunctionCode::InterAreaPrefix) => {
                LsaBody::InterAreaPrefix(LsaInterAreaPrefix::decode(buf)?)
            }
            Some(LsaFunctionCode::InterAreaRouter) => {
                LsaBody::InterAreaRouter(LsaInterAreaRouter::decode(buf)?)
            }
            Some(LsaFunctionCode::AsExternal) => {
                LsaBody::AsExternal(LsaAsExternal::decode(buf)?)
            }
            Some(LsaFunctionCode::Nssa) => {
                LsaBody::Nssa(LsaAsExternal::decode(buf)?)
            }
            Some(LsaFunctionCode::Link) => LsaBody::Link(LsaLink::decode(buf)?),
            Some(LsaFunctionCode::IntraAreaPrefix) => {
                LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::decode(buf)?)
            }
            None => LsaBody::Unknown(LsaUnknown {}),
        };

        Ok(lsa)
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(lsa) => lsa.encode(buf),
            LsaBody::Network(lsa) => lsa.encode(buf),
            LsaBody::InterAreaPrefix(lsa) => lsa.encode(buf),
            LsaBody::InterAreaRouter(lsa) => lsa.encode(buf),
            LsaBody::AsExternal(lsa) | LsaBody::Nssa(lsa) => lsa.encode(buf),
            LsaBody::Link(lsa) => lsa.encode(buf),
            LsaBody::IntraAreaPrefix(lsa) => lsa.encode(buf),
            // Unknown LSAs are never originated locally.
            LsaBody::Unknown(_) => (),
        }
    }

    pub fn lsa_type(&self) -> LsaType {
        match self {
            LsaBody::Router(_) => LsaType::ROUTER,
            LsaBody::Network(_) => LsaType::NETWORK,
            LsaBody::InterAreaPrefix(_) => LsaType::INTER_AREA_PREFIX,
            LsaBody::InterAreaRouter(_) => LsaType::INTER_AREA_ROUTER,
            LsaBody::AsExternal(_) => LsaType::AS_EXTERNAL,
            LsaBody::Nssa(_) => LsaType::NSSA,
            LsaBody::Link(_) => LsaType::LINK,
            LsaBody::IntraAreaPrefix(_) => LsaType::INTRA_AREA_PREFIX,
            LsaBody::Unknown(_) => LsaType::default(),
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    pub const BASE_LENGTH: u16 = 4;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, Self::BASE_LENGTH as usize)?;
        let flags = LsaRouterFlags::from_bits_truncate(buf.get_u8());
        let options = Options::decode(buf);

        let mut links = vec![];
        let links_cnt = buf.remaining() / LsaRouterLink::LENGTH as usize;
        for _ in 0..links_cnt {
            let link = LsaRouterLink::decode(buf)?;
            links.push(link);
        }

        Ok(LsaRouter::new(flags, options, links))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        self.options.encode(buf);
        for link in &self.links {
            link.encode(buf);
        }
    }
}

// ===== impl LsaRouterFlags =====

impl LsaRouterFlags {
    pub fn is_abr(&self) -> bool {
        self.contains(LsaRouterFlags::B)
    }

    pub fn is_asbr(&self) -> bool {
        self.contains(LsaRouterFlags::E)
    }
}

// ===== impl LsaRouterLink =====

impl LsaRouterLink {
    pub const LENGTH: u16 = 16;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let link_type = buf.get_u8();
        let link_type = match LsaRouterLinkType::from_u8(link_type) {
            Some(link_type) => link_type,
            None => return Err(DecodeError::UnknownRouterLinkType(link_type)),
        };
        let _ = buf.get_u8();
        let metric = buf.get_u16();
        let iface_id = buf.get_u32();
        let nbr_iface_id = buf.get_u32();
        let nbr_router_id = buf.get_ipv4();

        Ok(LsaRouterLink::new(
            link_type,
            metric,
            iface_id,
            nbr_iface_id,
            nbr_router_id,
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.link_type as u8);
        buf.put_u8(0);
        buf.put_u16(self.metric);
        buf.put_u32(self.iface_id);
        buf.put_u32(self.nbr_iface_id);
        buf.put_ipv4(&self.nbr_router_id);
    }
}

// ===== impl LsaNetwork =====

impl LsaNetwork {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, 4)?;
        let _ = buf.get_u8();
        let options = Options::decode(buf);

        let mut attached_rtrs = BTreeSet::new();
        let rtrs_cnt = buf.remaining() / 4;
        for _ in 0..rtrs_cnt {
            attached_rtrs.insert(buf.get_ipv4());
        }

        Ok(LsaNetwork::new(options, attached_rtrs))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        self.options.encode(buf);
        for rtr in &self.attached_rtrs {
            buf.put_ipv4(rtr);
        }
    }
}

// ===== impl LsaInterAreaPrefix =====

impl LsaInterAreaPrefix {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, 8)?;
        let _ = buf.get_u8();
        let metric = buf.get_u24();
        let plen = buf.get_u8();
        let prefix_options = PrefixOptions::from_bits_truncate(buf.get_u8());
        let _ = buf.get_u16();
        let prefix = decode_prefix(plen, buf)?;

        Ok(LsaInterAreaPrefix::new(metric, prefix_options, prefix))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        buf.put_u24(self.metric);
        buf.put_u8(self.prefix.prefix());
        buf.put_u8(self.prefix_options.bits());
        buf.put_u16(0);
        buf.put_ipv6_prefix(&self.prefix);
    }
}

// ===== impl LsaInterAreaRouter =====

impl LsaInterAreaRouter {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, 12)?;
        let _ = buf.get_u8();
        let options = Options::decode(buf);
        let _ = buf.get_u8();
        let metric = buf.get_u24();
        let router_id = buf.get_ipv4();

        Ok(LsaInterAreaRouter::new(options, metric, router_id))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0);
        self.options.encode(buf);
        buf.put_u8(0);
        buf.put_u24(self.metric);
        buf.put_ipv4(&self.router_id);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, 8)?;
        let flags = LsaAsExternalFlags::from_bits_truncate(buf.get_u8());
        let metric = buf.get_u24();
        let plen = buf.get_u8();
        let prefix_options = PrefixOptions::from_bits_truncate(buf.get_u8());
        let ref_lsa_type = match buf.get_u16() {
            0 => None,
            ref_lsa_type => Some(LsaType(ref_lsa_type)),
        };
        let prefix = decode_prefix(plen, buf)?;
        let fwd_addr = if flags.contains(LsaAsExternalFlags::F) {
            ensure_remaining(buf, 16)?;
            Some(buf.get_ipv6())
        } else {
            None
        };
        let tag = if flags.contains(LsaAsExternalFlags::T) {
            ensure_remaining(buf, 4)?;
            Some(buf.get_u32())
        } else {
            None
        };
        let ref_lsa_id = if ref_lsa_type.is_some() {
            ensure_remaining(buf, 4)?;
            Some(buf.get_ipv4())
        } else {
            None
        };

        Ok(LsaAsExternal::new(
            flags,
            metric,
            prefix_options,
            prefix,
            fwd_addr,
            tag,
            ref_lsa_type,
            ref_lsa_id,
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u24(self.metric);
        buf.put_u8(self.prefix.prefix());
        buf.put_u8(self.prefix_options.bits());
        buf.put_u16(self.ref_lsa_type.map(|t| t.0).unwrap_or(0));
        buf.put_ipv6_prefix(&self.prefix);
        if let Some(fwd_addr) = &self.fwd_addr {
            buf.put_ipv6(fwd_addr);
        }
        if let Some(tag) = self.tag {
            buf.put_u32(tag);
        }
        if let Some(ref_lsa_id) = &self.ref_lsa_id {
            buf.put_ipv4(ref_lsa_id);
        }
    }
}

// ===== impl LsaLink =====

impl LsaLink {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, 24)?;
        let priority = buf.get_u8();
        let options = Options::decode(buf);
        let linklocal = buf.get_ipv6();

        let mut prefixes = vec![];
        let prefixes_cnt = buf.get_u32();
        for _ in 0..prefixes_cnt {
            ensure_remaining(buf, 4)?;
            let plen = buf.get_u8();
            let options = PrefixOptions::from_bits_truncate(buf.get_u8());
            let _ = buf.get_u16();
            let prefix = decode_prefix(plen, buf)?;
            prefixes.push(LsaLinkPrefix::new(options, prefix));
        }

        Ok(LsaLink::new(priority, options, linklocal, prefixes))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.priority);
        self.options.encode(buf);
        buf.put_ipv6(&self.linklocal);
        buf.put_u32(self.prefixes.len() as u32);
        for prefix in &self.prefixes {
            buf.put_u8(prefix.value.prefix());
            buf.put_u8(prefix.options.bits());
            buf.put_u16(0);
            buf.put_ipv6_prefix(&prefix.value);
        }
    }
}

// ===== impl LsaIntraAreaPrefix =====

impl LsaIntraAreaPrefix {
    pub const BASE_LENGTH: u16 = 12;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        ensure_remaining(buf, Self::BASE_LENGTH as usize)?;
        let prefixes_cnt = buf.get_u16();
        let ref_lsa_type = LsaType(buf.get_u16());
        let ref_lsa_id = buf.get_ipv4();
        let ref_adv_rtr = buf.get_ipv4();

        let mut prefixes = vec![];
        for _ in 0..prefixes_cnt {
            ensure_remaining(buf, 4)?;
            let plen = buf.get_u8();
            let options = PrefixOptions::from_bits_truncate(buf.get_u8());
            let metric = buf.get_u16();
            let prefix = decode_prefix(plen, buf)?;
            let entry = LsaIntraAreaPrefixEntry::new(options, prefix, metric);
            prefixes.push(entry);
        }

        Ok(LsaIntraAreaPrefix::new(
            ref_lsa_type,
            ref_lsa_id,
            ref_adv_rtr,
            prefixes,
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.prefixes.len() as u16);
        buf.put_u16(self.ref_lsa_type.0);
        buf.put_ipv4(&self.ref_lsa_id);
        buf.put_ipv4(&self.ref_adv_rtr);
        for prefix in &self.prefixes {
            buf.put_u8(prefix.value.prefix());
            buf.put_u8(prefix.options.bits());
            buf.put_u16(prefix.metric);
            buf.put_ipv6_prefix(&prefix.value);
        }
    }
}

impl LsaIntraAreaPrefixEntry {
    pub const MAX_LENGTH: usize = 20;
}

// ===== helper functions =====

fn ensure_remaining(buf: &Bytes, len: usize) -> DecodeResult<()> {
    if buf.remaining() < len {
        return Err(DecodeError::InvalidLength(buf.remaining() as u16));
    }
    Ok(())
}

fn decode_prefix(plen: u8, buf: &mut Bytes) -> DecodeResult<Ipv6Network> {
    ensure_remaining(buf, prefix_wire_len(plen))?;
    buf.get_ipv6_prefix(plen).ok_or(DecodeError::InvalidIpPrefix)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn router_lsa() -> Lsa {
        let body = LsaBody::Router(LsaRouter::new(
            LsaRouterFlags::B,
            Options::R | Options::V6 | Options::E,
            vec![
                LsaRouterLink::new(
                    LsaRouterLinkType::PointToPoint,
                    10,
                    1,
                    2,
                    Ipv4Addr::new(2, 2, 2, 2),
                ),
                LsaRouterLink::new(
                    LsaRouterLinkType::TransitNetwork,
                    20,
                    3,
                    4,
                    Ipv4Addr::new(3, 3, 3, 3),
                ),
            ],
        ));
        Lsa::new(
            1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(1, 1, 1, 1),
            LSA_INIT_SEQ_NO,
            body,
        )
    }

    #[test]
    fn lsa_type_scope() {
        assert_eq!(LsaType::ROUTER.scope(), LsaScope::Area);
        assert_eq!(LsaType::LINK.scope(), LsaScope::Link);
        assert_eq!(LsaType::AS_EXTERNAL.scope(), LsaScope::As);
        // Unknown function code, U-bit clear: link-local scope.
        assert_eq!(LsaType(0x4020).scope(), LsaScope::Link);
        // Unknown function code, U-bit set: honor the scope bits.
        assert_eq!(LsaType(0xc020).scope(), LsaScope::As);
        assert_eq!(LsaType(0xe020).scope(), LsaScope::Unknown);
    }

    #[test]
    fn checksum_and_length() {
        let lsa = router_lsa();
        assert_eq!(lsa.hdr.length, 20 + 4 + 2 * 16);
        assert_eq!(lsa.raw.len(), lsa.hdr.length as usize);
        assert!(lsa.validate().is_ok());
    }

    #[test]
    fn age_not_covered_by_checksum() {
        let mut lsa = router_lsa();
        let cksum = lsa.hdr.cksum;
        lsa.set_age(1234);
        assert_eq!(lsa.hdr.cksum, cksum);
        assert_eq!(&lsa.raw[0..2], &1234u16.to_be_bytes());
        assert!(lsa.validate().is_ok());
    }

    #[test]
    fn corrupted_lsa_rejected() {
        let lsa = router_lsa();
        let mut raw = BytesMut::from(lsa.raw.as_ref());
        raw[30] ^= 0xff;
        let mut raw = raw.freeze();
        let lsa = Lsa::decode(&mut raw).unwrap();
        assert_eq!(lsa.validate(), Err(LsaValidationError::InvalidChecksum));
    }

    #[test]
    fn decode_encoded_intra_area_prefix() {
        let body = LsaBody::IntraAreaPrefix(LsaIntraAreaPrefix::new(
            LsaType::ROUTER,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::new(1, 1, 1, 1),
            vec![
                LsaIntraAreaPrefixEntry::new(
                    PrefixOptions::empty(),
                    "2001:db8:1::/64".parse().unwrap(),
                    10,
                ),
                LsaIntraAreaPrefixEntry::new(
                    PrefixOptions::LA,
                    "2001:db8::1/128".parse().unwrap(),
                    0,
                ),
            ],
        ));
        let adv_rtr = Ipv4Addr::new(1, 1, 1, 1);
        let lsa = Lsa::new(0, Ipv4Addr::UNSPECIFIED, adv_rtr, 5, body);
        let mut raw = lsa.raw.clone();
        let decoded = Lsa::decode(&mut raw).unwrap();
        assert_eq!(decoded.body, lsa.body);
        assert_eq!(decoded.hdr, lsa.hdr);
    }

    #[test]
    fn truncated_lsa_rejected() {
        let lsa = router_lsa();
        let mut raw = lsa.raw.slice(0..30);
        assert_eq!(Lsa::decode(&mut raw), Err(DecodeError::InvalidLsaLength));
    }
}
