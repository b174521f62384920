//! TLS 配置加载
//!
//! 把 PEM 证书与私钥装载为 rustls 配置，供服务端 acceptor
//! 与客户端 connector 使用。

use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// 服务端 TLS 配置
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// 客户端 TLS 配置
#[derive(Debug, Clone)]
pub struct ClientTlsConfig {
    /// 信任的 CA 证书（PEM）
    pub ca_path: String,
    /// 证书校验使用的服务名，缺省取请求的主机名
    pub server_name: Option<String>,
}

/// 装载服务端 rustls 配置
pub fn load_server_config(tls: &ServerTlsConfig) -> Result<Arc<ServerConfig>> {
    let certs = read_certs(&tls.cert_path)?;
    let key = read_key(&tls.key_path)?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::internal_server("TLS_CONFIG", e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// 装载客户端 rustls 配置
pub fn load_client_config(tls: &ClientTlsConfig) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&tls.ca_path)? {
        roots
            .add(cert)
            .map_err(|e| Error::internal_server("TLS_CONFIG", e.to_string()))?;
    }
    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Ok(Arc::new(config))
}

fn read_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path.as_ref()).map_err(Error::from)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn read_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path.as_ref()).map_err(Error::from)?;
    let mut reader = BufReader::new(file);
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map(|res| res.map(PrivateKeyDer::Pkcs8))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)?;
    if keys.is_empty() {
        return Err(Error::internal_server("TLS_CONFIG", "no pkcs8 private key found"));
    }
    Ok(keys.remove(0))
}
