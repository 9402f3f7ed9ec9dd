use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use bytes::{Buf, BufMut};
use crate::protocol::binary::{CodecError, CodecResult, RakBuf};

const VERSION_4: u8 = 4;
const VERSION_6: u8 = 6;
const AF_INET6: u16 = 10;

/// the placeholder for unused entries in system address lists
pub const UNSPECIFIED_ADDRESS: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

/// ```ascii
/// V4:
///  0: version 4 (u8)
///  1: address octets (4 x u8), each bitwise inverted
///  5: port (u16)
///
/// V6:
///  0: version 6 (u8)
///  1: address family AF_INET6 (u16, little endian)
///  3: port (u16)
///  5: flow info (u32), always 0
///  9: address (16 bytes)
/// 25: scope id (u32), always 0
/// ```
pub fn ser_address(addr: &SocketAddr, buf: &mut impl BufMut) {
    match addr {
        SocketAddr::V4(addr) => {
            buf.put_u8(VERSION_4);
            for octet in addr.ip().octets() {
                buf.put_u8(!octet);
            }
            buf.put_u16(addr.port());
        }
        SocketAddr::V6(addr) => {
            buf.put_u8(VERSION_6);
            buf.put_u16_le(AF_INET6);
            buf.put_u16(addr.port());
            buf.put_u32(0);
            buf.put_slice(&addr.ip().octets());
            buf.put_u32(0);
        }
    }
}

pub fn deser_address(buf: &mut impl Buf) -> CodecResult<SocketAddr> {
    match buf.read_u8()? {
        VERSION_4 => {
            buf.ensure_remaining(6)?;
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            let ip = Ipv4Addr::from(octets.map(|o| !o));
            let port = buf.get_u16();
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        VERSION_6 => {
            let _family = buf.read_u16_le()?;
            let port = buf.read_u16()?;
            let _flow_info = buf.read_u32()?;
            buf.ensure_remaining(16)?;
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let _scope_id = buf.read_u32()?;
            Ok(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0)))
        }
        other => Err(CodecError::UnknownAddressVersion(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::v4(SocketAddr::from(([127,0,0,1], 19132)), vec![4, 0x80,0xff,0xff,0xfe, 0x4a,0xbc])]
    #[case::v4_unspecified(UNSPECIFIED_ADDRESS, vec![4, 0xff,0xff,0xff,0xff, 0,0])]
    #[case::v6(SocketAddr::from(([1,2,3,4,5,6,7,8], 0x1234)), vec![6, 10,0, 0x12,0x34, 0,0,0,0, 0,1,0,2,0,3,0,4,0,5,0,6,0,7,0,8, 0,0,0,0])]
    fn test_ser(#[case] addr: SocketAddr, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        ser_address(&addr, &mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        assert_eq!(deser_address(&mut b).unwrap(), addr);
        assert!(b.is_empty());
    }

    #[rstest]
    #[case::unknown_version(vec![5, 1,2,3,4,5,6], CodecError::UnknownAddressVersion(5))]
    #[case::short_v4(vec![4, 1,2,3,4,5], CodecError::Truncated { needed: 6, remaining: 5 })]
    #[case::short_v6(vec![6, 10,0, 0,1, 0,0,0,0, 1,2,3], CodecError::Truncated { needed: 16, remaining: 3 })]
    fn test_deser_invalid(#[case] data: Vec<u8>, #[case] expected: CodecError) {
        assert_eq!(deser_address(&mut data.as_slice()), Err(expected));
    }
}
