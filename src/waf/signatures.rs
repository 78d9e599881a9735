/// Passive fingerprint of one WAF or CDN provider.
#[derive(Debug, Clone)]
pub struct WafSignature {
    pub provider: &'static str,
    /// (header name, substring of its value); an empty substring means presence is enough.
    pub headers: &'static [(&'static str, &'static str)],
    pub server_patterns: &'static [&'static str],
    pub cookies: &'static [&'static str],
    pub body_patterns: &'static [&'static str],
}

pub const SIGNATURES: &[WafSignature] = &[
    WafSignature {
        provider: "Cloudflare",
        headers: &[("cf-ray", ""), ("cf-cache-status", "")],
        server_patterns: &["cloudflare"],
        cookies: &["__cf_bm", "__cfduid", "cf_clearance"],
        body_patterns: &["Attention Required! | Cloudflare", "cf-error-details"],
    },
    WafSignature {
        provider: "Akamai",
        headers: &[("x-akamai-transformed", ""), ("akamai-grn", ""), ("x-akamai-request-id", "")],
        server_patterns: &["akamaighost", "akamai"],
        cookies: &["ak_bmsc", "bm_sv", "_abck"],
        body_patterns: &["Reference #"],
    },
    WafSignature {
        provider: "Imperva Incapsula",
        headers: &[("x-iinfo", ""), ("x-cdn", "incapsula")],
        server_patterns: &["incapsula"],
        cookies: &["incap_ses_", "visid_incap_"],
        body_patterns: &["Incapsula incident ID"],
    },
    WafSignature {
        provider: "AWS CloudFront / WAF",
        headers: &[("x-amz-cf-id", ""), ("x-amz-cf-pop", ""), ("x-cache", "cloudfront")],
        server_patterns: &["cloudfront", "awselb"],
        cookies: &["awsalb", "aws-waf-token"],
        body_patterns: &["Request blocked. We can't connect to the server"],
    },
    WafSignature {
        provider: "Azure Front Door",
        headers: &[("x-azure-ref", ""), ("x-fd-healthprobe", "")],
        server_patterns: &["azure"],
        cookies: &["ARRAffinity"],
        body_patterns: &["The request is blocked."],
    },
    WafSignature {
        provider: "Fastly",
        headers: &[("x-fastly-request-id", ""), ("fastly-debug-digest", ""), ("x-served-by", "cache-")],
        server_patterns: &["fastly"],
        cookies: &[],
        body_patterns: &[],
    },
    WafSignature {
        provider: "Sucuri CloudProxy",
        headers: &[("x-sucuri-id", ""), ("x-sucuri-cache", "")],
        server_patterns: &["sucuri"],
        cookies: &["sucuri_cloudproxy"],
        body_patterns: &["Sucuri WebSite Firewall"],
    },
    WafSignature {
        provider: "F5 BIG-IP ASM",
        headers: &[("x-wa-info", "")],
        server_patterns: &["big-ip", "bigip"],
        cookies: &["BIGipServer", "TS01"],
        body_patterns: &["The requested URL was rejected"],
    },
    WafSignature {
        provider: "ModSecurity",
        headers: &[],
        server_patterns: &["mod_security", "modsecurity"],
        cookies: &[],
        body_patterns: &["ModSecurity", "This error was generated by Mod_Security"],
    },
    WafSignature {
        provider: "Vercel",
        headers: &[("x-vercel-id", ""), ("x-vercel-cache", "")],
        server_patterns: &["vercel"],
        cookies: &[],
        body_patterns: &[],
    },
    WafSignature {
        provider: "Netlify",
        headers: &[("x-nf-request-id", "")],
        server_patterns: &["netlify"],
        cookies: &[],
        body_patterns: &[],
    },
    WafSignature {
        provider: "Wordfence",
        headers: &[],
        server_patterns: &[],
        cookies: &["wfvt_", "wordfence_verifiedHuman"],
        body_patterns: &["Generated by Wordfence"],
    },
    WafSignature {
        provider: "Barracuda",
        headers: &[],
        server_patterns: &["barracuda"],
        cookies: &["barra_counter_session", "BNI__BARRACUDA_LB_COOKIE"],
        body_patterns: &[],
    },
];
