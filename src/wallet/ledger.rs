//! Ledger hardware wallet over the Ethereum app's APDU protocol

use super::{ensure_sender, require_hash, wait_for_receipt, PublicKey, SendHints, WaitParams, Wallet};
use crate::error::{SigningError, TxError};
use crate::rpc::{AlloyRpc, ChainRpc};
use crate::types::{FeeParams, Receipt, SignedTransaction, TxRef, UnsignedTx};
use alloy::primitives::{Address, Signature, B256, U256};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// Largest data field of one APDU
pub const CHUNK_SIZE: usize = 255;

const CLA: u8 = 0xe0;
const INS_GET_ADDRESS: u8 = 0x02;
const INS_SIGN: u8 = 0x04;
const P1_FIRST: u8 = 0x00;
const P1_MORE: u8 = 0x80;
const HARDENED: u32 = 0x8000_0000;
const SW_OK: u16 = 0x9000;

/// Derivation path of account `index` (Ledger Live layout, or the legacy MEW one)
pub fn derivation_path(index: u32, legacy: bool) -> String {
    if legacy {
        format!("44'/60'/0'/{index}")
    } else {
        format!("44'/60'/{index}'/0/0")
    }
}

/// Encode a BIP-32 path as `<component count> <u32 BE>...`
pub fn encode_bip32_path(path: &str) -> Result<Vec<u8>, SigningError> {
    let components = path
        .trim_start_matches("m/")
        .split('/')
        .map(|part| {
            let (digits, hardened) = match part.strip_suffix('\'') {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| SigningError::Device(format!("invalid path component {part:?}")))?;
            if index >= HARDENED {
                return Err(SigningError::Device(format!("path component {part:?} out of range")));
            }
            Ok(if hardened { index | HARDENED } else { index })
        })
        .collect::<Result<Vec<u32>, _>>()?;

    let count = u8::try_from(components.len())
        .map_err(|_| SigningError::Device("derivation path too deep".to_string()))?;

    let mut encoded = Vec::with_capacity(1 + components.len() * 4);
    encoded.push(count);
    for component in components {
        encoded.extend_from_slice(&component.to_be_bytes());
    }
    Ok(encoded)
}

/// Split `path_prefix ‖ payload` into sign APDUs of at most [`CHUNK_SIZE`] data bytes
pub fn sign_frames(path_prefix: &[u8], payload: &[u8]) -> Vec<Vec<u8>> {
    let data = [path_prefix, payload].concat();

    data.chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let p1 = if i == 0 { P1_FIRST } else { P1_MORE };
            let mut apdu = Vec::with_capacity(5 + chunk.len());
            // chunks never exceed CHUNK_SIZE, so the length fits a byte
            apdu.extend_from_slice(&[CLA, INS_SIGN, p1, 0x00, chunk.len() as u8]);
            apdu.extend_from_slice(chunk);
            apdu
        })
        .collect()
}

/// One APDU round trip to the device
///
/// Implementations return the response data without the status word and map
/// any status other than `0x9000` to [`SigningError::Device`].
pub trait ApduTransport: Send + Sync {
    fn exchange<'a>(&'a self, apdu: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, SigningError>>;
}

/// TCP transport for the Speculos emulator's APDU port
pub struct SpeculosTransport {
    stream: Mutex<TcpStream>,
}

impl SpeculosTransport {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, SigningError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SigningError::Device(format!("cannot reach emulator: {e}")))?;
        Ok(Self {
            stream: Mutex::new(stream),
        })
    }

    async fn round_trip(&self, apdu: &[u8]) -> std::io::Result<(Vec<u8>, u16)> {
        let mut stream = self.stream.lock().await;

        let len = u32::try_from(apdu.len()).map_err(std::io::Error::other)?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(apdu).await?;

        let len = stream.read_u32().await? as usize;
        let mut data = vec![0u8; len];
        stream.read_exact(&mut data).await?;
        let sw = stream.read_u16().await?;

        Ok((data, sw))
    }
}

impl ApduTransport for SpeculosTransport {
    fn exchange<'a>(&'a self, apdu: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, SigningError>> {
        Box::pin(async move {
            let (data, sw) = self
                .round_trip(apdu)
                .await
                .map_err(|e| SigningError::Device(format!("emulator i/o: {e}")))?;
            check_status(sw)?;
            Ok(data)
        })
    }
}

fn check_status(sw: u16) -> Result<(), SigningError> {
    match sw {
        SW_OK => Ok(()),
        0x6985 => Err(SigningError::Device("request denied on device".to_string())),
        0x6a80 => Err(SigningError::Device("invalid data, is blind signing enabled?".to_string())),
        0x6d00 | 0x6e00 => Err(SigningError::Device("Ethereum app is not open".to_string())),
        other => Err(SigningError::Device(format!("status word {other:#06x}"))),
    }
}

/// Parse `<pk_len> <pk> <addr_len> <ascii hex address>`
fn parse_address_response(data: &[u8]) -> Result<(Address, PublicKey), SigningError> {
    let malformed = || SigningError::Malformed("short get-address response".to_string());

    let pk_len = *data.first().ok_or_else(malformed)? as usize;
    let pk = data.get(1..1 + pk_len).ok_or_else(malformed)?;
    let addr_len = *data.get(1 + pk_len).ok_or_else(malformed)? as usize;
    let addr = data.get(2 + pk_len..2 + pk_len + addr_len).ok_or_else(malformed)?;

    let pk = match pk {
        [0x04, rest @ ..] if rest.len() == 64 => rest,
        _ => return Err(SigningError::Malformed(format!("unexpected public key length {pk_len}"))),
    };

    let addr = std::str::from_utf8(addr)
        .map_err(|e| SigningError::Malformed(format!("address is not ascii: {e}")))?;
    let address: Address = format!("0x{addr}")
        .parse()
        .map_err(|e| SigningError::Malformed(format!("address {addr:?}: {e}")))?;

    Ok((address, PublicKey::from_slice(pk)))
}

/// Parse `v ‖ r ‖ s`; legacy `v` carries the EIP-155 offset truncated to a byte
fn parse_signature(data: &[u8], tx: &UnsignedTx) -> Result<Signature, SigningError> {
    if data.len() < 65 {
        return Err(SigningError::Malformed(format!(
            "signature response has {} bytes",
            data.len()
        )));
    }

    let v = data[0];
    let r = U256::from_be_slice(&data[1..33]);
    let s = U256::from_be_slice(&data[33..65]);

    let parity = match tx.fees {
        FeeParams::Legacy { .. } => {
            let offset = tx.chain_id.wrapping_mul(2).wrapping_add(35) % 256;
            v.wrapping_sub(offset as u8)
        }
        FeeParams::Eip1559 { .. } if v >= 27 => v - 27,
        FeeParams::Eip1559 { .. } => v,
    };

    if parity > 1 {
        return Err(SigningError::Malformed(format!("unexpected v {v}")));
    }
    Ok(Signature::new(r, s, parity == 1))
}

/// Ledger-backed wallet
///
/// Holds the transport for the whole multi-frame sign exchange so concurrent
/// signs do not interleave frames.
pub struct LedgerWallet<R = AlloyRpc> {
    transport: Mutex<Box<dyn ApduTransport>>,
    path_prefix: Vec<u8>,
    address: Address,
    public_key: PublicKey,
    rpc: Arc<R>,
}

impl LedgerWallet<AlloyRpc> {
    /// Connect to a Speculos emulator and an RPC endpoint
    pub async fn connect_speculos(
        emulator: impl ToSocketAddrs,
        index: u32,
        legacy: bool,
        rpc_url: impl AsRef<str>,
    ) -> eyre::Result<Self> {
        let rpc = AlloyRpc::connect(rpc_url)?;
        let transport = SpeculosTransport::connect(emulator).await?;
        Ok(Self::new(Box::new(transport), index, legacy, Arc::new(rpc)).await?)
    }
}

impl<R: ChainRpc> LedgerWallet<R> {
    /// Open account `index` on the device behind `transport`
    pub async fn new(
        transport: Box<dyn ApduTransport>,
        index: u32,
        legacy: bool,
        rpc: Arc<R>,
    ) -> Result<Self, TxError> {
        let path = derivation_path(index, legacy);
        let path_prefix = encode_bip32_path(&path)?;

        let mut apdu = vec![CLA, INS_GET_ADDRESS, 0x00, 0x00, path_prefix.len() as u8];
        apdu.extend_from_slice(&path_prefix);
        let response = transport.exchange(&apdu).await?;
        let (address, public_key) = parse_address_response(&response)?;

        tracing::info!(%address, %path, "Opened Ledger account");

        Ok(Self {
            transport: Mutex::new(transport),
            path_prefix,
            address,
            public_key,
            rpc,
        })
    }
}

impl<R: ChainRpc> Wallet for LedgerWallet<R> {
    fn address(&self) -> Address {
        self.address
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    async fn sign(&self, tx: &UnsignedTx) -> Result<SignedTransaction, TxError> {
        ensure_sender(self.address, tx)?;

        let signable = tx.to_signable();
        let frames = sign_frames(&self.path_prefix, &signable.encoded_for_signing());
        tracing::debug!(frames = frames.len(), nonce = tx.nonce, "Signing on Ledger");

        let transport = self.transport.lock().await;
        let mut response = Vec::new();
        for frame in &frames {
            response = transport.exchange(frame).await?;
        }
        drop(transport);

        let signature = parse_signature(&response, tx)?;
        Ok(signable.into_signed(signature))
    }

    async fn sign_hash(&self, _hash: B256) -> Result<Signature, TxError> {
        Err(TxError::UnsupportedOperation {
            wallet: "LedgerWallet",
            operation: "sign_hash",
        })
    }

    async fn sign_and_send(&self, tx: &UnsignedTx, _hints: &SendHints) -> Result<TxRef, TxError> {
        let signed = self.sign(tx).await?;
        let tx_hash = self.rpc.send_raw_transaction(&signed.raw).await?;
        tracing::info!(tx_hash = %tx_hash, nonce = tx.nonce, "Sent transaction");

        Ok(TxRef::Hash(tx_hash))
    }

    async fn wait(&self, tx: &TxRef, params: &WaitParams) -> Result<Receipt, TxError> {
        let tx_hash = require_hash(tx, "LedgerWallet")?;
        wait_for_receipt(&*self.rpc, tx_hash, params).await
    }
}
