//! 端口转发相关领域模型
//!
//! 纯数据类型，无 tokio 依赖

use serde::Deserialize;

/// 一条常驻的本地 -> 远程端口转发
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelRoute {
    /// 本地监听端口
    pub local_port: u16,
    /// 本地绑定地址
    pub bind_address: String,
    /// 远程侧真正的目标主机
    pub target_host: String,
    /// 远程侧目标端口
    pub target_port: u16,
    /// direct-tcpip 通道声明的来源地址
    pub source_host: String,
    /// direct-tcpip 通道声明的来源端口
    pub source_port: u16,
}

impl TunnelRoute {
    /// 转发本地端口到远程主机上的同一端口
    pub fn to_remote(port: u16) -> Self {
        Self {
            local_port: port,
            bind_address: "127.0.0.1".to_string(),
            target_host: "localhost".to_string(),
            target_port: port,
            source_host: "127.0.0.1".to_string(),
            source_port: port,
        }
    }

    /// 本地监听地址
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.local_port)
    }

    /// 远程目标地址
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

/// 配置文件中的端口转发写法
///
/// `ports = [3000, { port = 8080, local_port = 18080 }]`
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ForwardSpec {
    Port(u16),
    Detailed {
        port: u16,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        local_port: Option<u16>,
        #[serde(default)]
        bind: Option<String>,
        #[serde(default)]
        source_host: Option<String>,
        #[serde(default)]
        source_port: Option<u16>,
    },
}

impl ForwardSpec {
    pub fn into_route(self) -> TunnelRoute {
        match self {
            ForwardSpec::Port(port) => TunnelRoute::to_remote(port),
            ForwardSpec::Detailed {
                port,
                target,
                local_port,
                bind,
                source_host,
                source_port,
            } => {
                let mut route = TunnelRoute::to_remote(port);
                if let Some(target) = target {
                    route.target_host = target;
                }
                if let Some(local_port) = local_port {
                    route.local_port = local_port;
                    route.source_port = local_port;
                }
                if let Some(bind) = bind {
                    route.bind_address = bind;
                }
                if let Some(source_host) = source_host {
                    route.source_host = source_host;
                }
                if let Some(source_port) = source_port {
                    route.source_port = source_port;
                }
                route
            }
        }
    }
}
