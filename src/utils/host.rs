//! 主机地址提取
//!
//! 监听地址是通配地址（`0.0.0.0` / `[::]`）时，对外公布的端点
//! 需要换成一个可路由的本机地址。

use std::net::{IpAddr, SocketAddr, UdpSocket};

/// 判断地址是否为可对外公布的 IP
fn is_valid_ip(ip: &IpAddr) -> bool {
    !ip.is_unspecified() && !ip.is_loopback() && !ip.is_multicast()
}

/// 探测本机默认路由使用的出口地址
///
/// 通过连接一个公网地址的 UDP socket 读取内核选择的源地址，
/// 不会真正发包。探测失败时退回环回地址。
fn probe_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if is_valid_ip(&ip) => ip,
        _ => IpAddr::from([127, 0, 0, 1]),
    }
}

/// 由配置的监听地址与实际绑定地址计算注册用的 `host:port`
///
/// 配置给出了具体主机时原样保留，只取实际绑定端口；
/// 通配地址换成探测到的本机地址。
pub fn extract(hint: &str, actual: SocketAddr) -> String {
    let port = actual.port();
    if let Some((host, _)) = hint.rsplit_once(':') {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            // 只有通配地址需要替换，环回等具体地址按配置公布
            if !ip.is_unspecified() {
                return format_host_port(ip, port);
            }
        } else if !host.is_empty() {
            // 主机名原样保留
            return format!("{}:{}", host, port);
        }
    }
    format_host_port(probe_local_ip(), port)
}

fn format_host_port(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}
