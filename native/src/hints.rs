// Well-known pipe names and the services that usually own them.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static PIPE_HINTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("atsvc", "Scheduler service"),
        ("AudioSrv", "Windows Audio service"),
        ("browser", "Computer Browser (ntsvcs alias)"),
        ("cert", "Certificate services"),
        ("Ctx_Winstation_API_Service", "Terminal Services remote management"),
        ("DAV RPC SERVICE", "WebDAV client"),
        ("dnsserver", "DNS Server"),
        ("epmapper", "RPC endpoint mapper"),
        ("eventlog", "Eventlog service (ntsvcs alias)"),
        ("HydraLsPipe", "Terminal Server Licensing"),
        ("InitShutdown", "(Remote) system shutdown"),
        ("keysvc", "Cryptographic services"),
        ("locator", "RPC Locator service"),
        ("llsrpc", "Licensing Logging service"),
        ("lsarpc", "LSA access (lsass alias)"),
        ("msgsvc", "Messenger service (ntsvcs alias)"),
        ("netdfs", "Distributed File System service"),
        ("netlogon", "Net Logon service (lsass alias)"),
        ("ntsvcs", "Plug and Play service"),
        ("policyagent", "IPSEC Policy Agent (Windows 2000)"),
        ("ipsec", "IPsec Services"),
        ("ProfMapApi", "Userenv"),
        ("protected_storage", "Protected Storage"),
        ("ROUTER", "Remote Access"),
        ("samr", "SAM access (lsass alias)"),
        ("scerpc", "Security Configuration Editor (SCE)"),
        ("SECLOGON", "Secondary logon service"),
        ("SfcApi", "Windows File Protection"),
        ("spoolss", "Spooler service"),
        ("srvsvc", "Server service (ntsvcs alias)"),
        ("ssdpsrv", "SSDP service"),
        ("svcctl", "Services control manager (ntsvcs alias)"),
        ("tapsrv", "Telephony service"),
        ("trkwks", "Distributed Link Tracking Client"),
        ("W32TIME", "Windows Time (Windows 2000 and XP)"),
        ("W32TIME_ALT", "Windows Time (Windows Server 2003)"),
        ("winlogonrpc", "Winlogon"),
        ("winreg", "Remote registry service"),
        ("winspipe", "WINS service"),
        ("wkssvc", "Workstation service (ntsvcs alias)"),
    ])
});

/// Human-readable description of a well-known pipe, or `""`.
///
/// Matching is exact and case-sensitive.
pub fn hint_for(pipe_name: &str) -> &'static str {
    PIPE_HINTS.get(pipe_name).copied().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_names_resolve() {
        assert_eq!(hint_for("spoolss"), "Spooler service");
        assert_eq!(hint_for("epmapper"), "RPC endpoint mapper");
        assert_eq!(hint_for("DAV RPC SERVICE"), "WebDAV client");
    }

    #[test]
    fn unknown_names_are_empty() {
        assert_eq!(hint_for("totally-unknown-name"), "");
        assert_eq!(hint_for(""), "");
        assert_eq!(hint_for("SPOOLSS"), "");
    }

    #[test]
    fn lookup_is_stable() {
        for _ in 0..3 {
            assert_eq!(hint_for("winreg"), "Remote registry service");
        }
        assert_eq!(PIPE_HINTS.len(), 40);
    }
}
