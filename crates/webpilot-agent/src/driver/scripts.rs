//! In-page JavaScript used by the Chromium driver.
//!
//! Every script is a function expression invoked with JSON-encoded arguments,
//! so caller-supplied strings never need manual escaping.

use serde::Serialize;
use serde_json::json;

/// Shared helpers prepended to scripts that address elements.
/// `root(frame)` is the document to search: the page, or an iframe's document.
const PRELUDE: &str = r#"
const root = (frame) => {
    if (!frame) return document;
    const f = document.querySelector(frame);
    if (!f) return null;
    try { return f.contentDocument; } catch (e) { return null; }
};
const norm = (s) => (s || '').trim().replace(/\s+/g, ' ');
const byText = (doc, raw) => {
    let exact = false, needle = raw;
    if (needle.length >= 2 && needle.startsWith('"') && needle.endsWith('"')) {
        exact = true;
        needle = needle.slice(1, -1);
    }
    const want = exact ? needle : needle.toLowerCase();
    const hits = (el) => {
        const t = norm(el.innerText || el.textContent);
        return exact ? t === want : t.toLowerCase().includes(want);
    };
    const all = Array.from(doc.body ? doc.body.querySelectorAll('*') : []);
    // innermost matches only: skip elements whose child also matches
    return all.filter(el => hits(el) && !Array.from(el.children).some(hits));
};
const queryAll = (doc, selector) => {
    if (selector.startsWith('text=')) return byText(doc, selector.slice(5));
    return Array.from(doc.querySelectorAll(selector));
};
const cssPath = (el) => {
    if (el.id) return '#' + CSS.escape(el.id);
    const path = [];
    let n = el;
    while (n && n.nodeType === 1) {
        let s = n.tagName.toLowerCase();
        if (n.id) { path.unshift('#' + CSS.escape(n.id)); break; }
        const p = n.parentElement;
        if (p) {
            const sibs = Array.from(p.children).filter(c => c.tagName === n.tagName);
            if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(n) + 1) + ')';
        }
        path.unshift(s);
        n = p;
    }
    return path.join(' > ');
};
const target = (frame, path) => {
    const doc = root(frame);
    return doc ? doc.querySelector(path) : null;
};
"#;

const SNAPSHOT_JS: &str = r#"
((selectors, maxNodes) => {
    const seen = new Set();
    const out = [];
    const attr = (el, name) => {
        const v = el.getAttribute(name);
        return v === null ? null : v;
    };
    for (const sel of selectors) {
        let nodes;
        try { nodes = document.querySelectorAll(sel); } catch (e) { continue; }
        for (const el of nodes) {
            if (seen.has(el)) continue;
            seen.add(el);
            const style = getComputedStyle(el);
            const hasValue = ('value' in el) && typeof el.value === 'string'
                && (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA' || el.tagName === 'SELECT');
            out.push({
                tag: el.tagName.toLowerCase(),
                id: el.id || null,
                test_id: attr(el, 'data-testid'),
                classes: Array.from(el.classList),
                name: attr(el, 'name'),
                input_type: attr(el, 'type'),
                role: attr(el, 'role'),
                aria_label: attr(el, 'aria-label'),
                text: (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ').slice(0, 300),
                placeholder: attr(el, 'placeholder'),
                value: hasValue ? el.value : null,
                src: attr(el, 'src'),
                alt: attr(el, 'alt'),
                href: attr(el, 'href'),
                display: style.display,
                visibility: style.visibility,
            });
            if (out.length >= maxNodes) return JSON.stringify(out);
        }
    }
    return JSON.stringify(out);
})
"#;

const RESOLVE_JS: &str = r#"
((frame, selector) => {
    const doc = root(frame);
    if (!doc) return { frame, frame_found: false, count: 0, path: '' };
    let matches;
    try { matches = queryAll(doc, selector); }
    catch (e) { return { frame, frame_found: true, count: 0, path: '' }; }
    if (matches.length === 0) return { frame, frame_found: true, count: 0, path: '' };
    return { frame, frame_found: true, count: matches.length, path: cssPath(matches[0]) };
})
"#;

const SCROLL_JS: &str = r#"
((frame, path) => {
    const el = target(frame, path);
    if (!el) return false;
    el.scrollIntoView({ behavior: 'instant', block: 'center', inline: 'center' });
    return true;
})
"#;

const CLICK_JS: &str = r#"
((frame, path) => {
    const el = target(frame, path);
    if (!el) return false;
    el.click();
    return true;
})
"#;

const FILL_JS: &str = r#"
((frame, path, value) => {
    const el = target(frame, path);
    if (!el) return false;
    el.focus();
    if (el.isContentEditable) {
        el.textContent = value;
    } else {
        const proto = Object.getPrototypeOf(el);
        const setter = Object.getOwnPropertyDescriptor(proto, 'value');
        if (setter && setter.set) setter.set.call(el, value); else el.value = value;
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
})
"#;

const SELECT_JS: &str = r#"
((frame, path, value) => {
    const sel = target(frame, path);
    if (!sel || !sel.options) return false;
    const opt = Array.from(sel.options).find(o => o.value === value || o.text === value);
    if (!opt) return false;
    sel.value = opt.value;
    sel.dispatchEvent(new Event('input', { bubbles: true }));
    sel.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
})
"#;

const RECT_JS: &str = r#"
((frame, path) => {
    const el = target(frame, path);
    if (!el) return null;
    const r = el.getBoundingClientRect();
    let dx = 0, dy = 0;
    if (frame) {
        const f = document.querySelector(frame);
        if (f) { const fr = f.getBoundingClientRect(); dx = fr.x; dy = fr.y; }
    }
    return { x: r.x + dx + r.width / 2, y: r.y + dy + r.height / 2 };
})
"#;

const DRAG_JS: &str = r#"
((srcFrame, srcPath, dstFrame, dstPath) => {
    const src = target(srcFrame, srcPath);
    const dst = target(dstFrame, dstPath);
    if (!src || !dst) return false;
    const center = (el) => { const r = el.getBoundingClientRect(); return { clientX: r.x + r.width / 2, clientY: r.y + r.height / 2 }; };
    const a = center(src), b = center(dst);
    const dt = new DataTransfer();
    const fire = (el, type, pt) => el.dispatchEvent(new DragEvent(type, { bubbles: true, cancelable: true, dataTransfer: dt, ...pt }));
    const mouse = (el, type, pt) => el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, ...pt }));
    mouse(src, 'mousedown', a);
    fire(src, 'dragstart', a);
    fire(dst, 'dragenter', b);
    fire(dst, 'dragover', b);
    fire(dst, 'drop', b);
    fire(src, 'dragend', b);
    mouse(dst, 'mousemove', b);
    mouse(dst, 'mouseup', b);
    return true;
})
"#;

const FOCUS_JS: &str = r#"
((frame, path) => {
    const el = target(frame, path);
    if (!el) return false;
    el.focus();
    return true;
})
"#;

/// Idempotent: a second install on the same document is a no-op.
pub(super) const CONSOLE_HOOK_JS: &str = r#"
(() => {
    if (window.__webpilotConsole) return false;
    const buf = [];
    window.__webpilotConsole = buf;
    const push = (level, args) => {
        try {
            buf.push({ level, text: Array.from(args).map(a => {
                if (typeof a === 'string') return a;
                try { return JSON.stringify(a); } catch (e) { return String(a); }
            }).join(' ') });
            if (buf.length > 500) buf.shift();
        } catch (e) {}
    };
    for (const level of ['log', 'info', 'warn', 'error', 'debug']) {
        const orig = console[level];
        console[level] = function () { push(level, arguments); return orig.apply(this, arguments); };
    }
    window.addEventListener('error', e => push('pageerror', [e.message]));
    window.addEventListener('unhandledrejection', e => push('unhandledrejection', [e.reason && e.reason.message ? e.reason.message : String(e.reason)]));
    return true;
})()
"#;

pub(super) const CONSOLE_READ_JS: &str =
    "JSON.stringify(window.__webpilotConsole ? window.__webpilotConsole.slice() : [])";

pub(super) const READY_STATE_JS: &str = "document.readyState";

pub(super) const VISIBLE_TEXT_JS: &str = "(document.body ? document.body.innerText : '')";

/// Prelude helpers are scoped to one evaluation so repeated calls on the
/// same page never redeclare globals.
fn call(script: &str, args: &[serde_json::Value]) -> String {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    format!(
        "(() => {{\n{}\nreturn {}({});\n}})()",
        PRELUDE,
        script.trim(),
        args.join(",")
    )
}

fn frame_arg(frame: &Option<String>) -> serde_json::Value {
    match frame {
        Some(f) => json!(f),
        None => serde_json::Value::Null,
    }
}

pub(super) fn snapshot(selectors: &[&str], max_nodes: usize) -> String {
    format!("{}({},{})", SNAPSHOT_JS, to_json(&selectors), max_nodes)
}

/// Evaluate arbitrary user script; the result always comes back as a JSON
/// string, with `undefined` and unserializable values mapped to `null`.
pub(super) fn evaluate(script: &str) -> String {
    format!(
        "(() => {{ const v = eval({}); const j = v === undefined ? undefined : JSON.stringify(v); return j === undefined ? 'null' : j; }})()",
        to_json(script)
    )
}

pub(super) fn resolve(frame: &Option<String>, selector: &str) -> String {
    call(RESOLVE_JS, &[frame_arg(frame), json!(selector)])
}

pub(super) fn scroll(frame: &Option<String>, path: &str) -> String {
    call(SCROLL_JS, &[frame_arg(frame), json!(path)])
}

pub(super) fn click(frame: &Option<String>, path: &str) -> String {
    call(CLICK_JS, &[frame_arg(frame), json!(path)])
}

pub(super) fn fill(frame: &Option<String>, path: &str, value: &str) -> String {
    call(FILL_JS, &[frame_arg(frame), json!(path), json!(value)])
}

pub(super) fn select(frame: &Option<String>, path: &str, value: &str) -> String {
    call(SELECT_JS, &[frame_arg(frame), json!(path), json!(value)])
}

pub(super) fn center(frame: &Option<String>, path: &str) -> String {
    call(RECT_JS, &[frame_arg(frame), json!(path)])
}

pub(super) fn focus(frame: &Option<String>, path: &str) -> String {
    call(FOCUS_JS, &[frame_arg(frame), json!(path)])
}

pub(super) fn drag(
    src_frame: &Option<String>,
    src_path: &str,
    dst_frame: &Option<String>,
    dst_path: &str,
) -> String {
    call(
        DRAG_JS,
        &[
            frame_arg(src_frame),
            json!(src_path),
            frame_arg(dst_frame),
            json!(dst_path),
        ],
    )
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
