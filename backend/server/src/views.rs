//! Server-rendered markup. All document text goes through [`escape`].
use std::fmt::Write;

use axum::{http::StatusCode, response::Html};
use bank::{
    Document,
    models::{Blog, Category, Order, OrderStatus, Product, UserRecord, Worker},
};

use crate::deeplink::HandoffPlan;

/// `sessionStorage` key marking a tab that already ran the handoff.
const HANDOFF_STORAGE_KEY: &str = "hillsgo:handoff";

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }

    escaped
}

/// JSON string literal that is safe inside a `<script>` block.
fn script_string(text: &str) -> String {
    serde_json::to_string(text)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{} | HillsGo</title>\n</head>\n<body>\n\
         <header><a href=\"/\">HillsGo</a> <a href=\"/blog\">Blog</a> \
         <a href=\"/login\">Sign in</a></header>\n\
         <main>\n{body}\n</main>\n</body>\n</html>\n",
        escape(title)
    ))
}

fn message_block(message: Option<&str>) -> String {
    message
        .map(|message| format!("<p class=\"message\" role=\"alert\">{}</p>\n", escape(message)))
        .unwrap_or_default()
}

fn sign_out_form() -> &'static str {
    "<form method=\"post\" action=\"/logout\"><button type=\"submit\">Sign out</button></form>\n"
}

fn date(timestamp: Option<bank::Timestamp>) -> String {
    timestamp.map(|ts| ts.date_string()).unwrap_or_default()
}

pub fn error_page(status: StatusCode, message: &str) -> Html<String> {
    page(
        status.canonical_reason().unwrap_or("Error"),
        &format!("<h1>{}</h1>\n<p>{}</p>", status.as_u16(), escape(message)),
    )
}

pub fn not_found(what: &str) -> Html<String> {
    page(
        "Not found",
        &format!("<h1>{} not found</h1>\n<p><a href=\"/\">Back home</a></p>", escape(what)),
    )
}

pub fn home(categories: &[Document<Category>], message: Option<&str>) -> Html<String> {
    let mut body = String::from(
        "<h1>Local services, delivered</h1>\n\
         <p>Find skilled workers and shop from local stores near you.</p>\n",
    );
    body.push_str(&message_block(message));

    body.push_str("<h2>Categories</h2>\n<ul class=\"categories\">\n");
    for category in categories {
        let _ = writeln!(body, "<li>{}</li>", escape(&category.data.name));
    }
    body.push_str("</ul>");

    page("Home", &body)
}

pub fn blog_index(blogs: &[Document<Blog>], message: Option<&str>) -> Html<String> {
    let mut body = String::from("<h1>Blog</h1>\n");
    body.push_str(&message_block(message));

    body.push_str("<ul class=\"posts\">\n");
    for blog in blogs {
        let _ = writeln!(
            body,
            "<li><a href=\"/blog/{}\">{}</a> <time>{}</time></li>",
            escape(&blog.data.slug),
            escape(&blog.data.title),
            date(blog.data.published_at)
        );
    }
    body.push_str("</ul>");

    page("Blog", &body)
}

pub fn blog_post(blog: &Blog) -> Html<String> {
    let mut body = format!("<article>\n<h1>{}</h1>\n", escape(&blog.title));
    if let Some(published) = blog.published_at {
        let _ = writeln!(body, "<time>{}</time>", published.date_string());
    }
    if let Some(cover) = &blog.cover_url {
        let _ = writeln!(body, "<img src=\"{}\" alt=\"\">", escape(cover));
    }
    for paragraph in blog.body.split("\n\n").filter(|p| !p.trim().is_empty()) {
        let _ = writeln!(body, "<p>{}</p>", escape(paragraph.trim()));
    }
    body.push_str("</article>");

    page(&blog.title, &body)
}

/// A tab that already ran the handoff skips it, even when the server hands out another plan.
fn handoff_script(plan: &HandoffPlan) -> String {
    format!(
        "<script>\n(function () {{\n\
         var key = {key};\n\
         try {{\n\
         \x20 if (sessionStorage.getItem(key)) {{ return; }}\n\
         \x20 sessionStorage.setItem(key, \"1\");\n\
         }} catch (e) {{}}\n\
         var appUri = {app};\n\
         var webUri = {web};\n\
         var started = Date.now();\n\
         var timer = setTimeout(function () {{\n\
         \x20 stop();\n\
         \x20 if (Date.now() - started < {threshold}) {{ window.location.replace(webUri); }}\n\
         }}, {delay});\n\
         function stop() {{\n\
         \x20 clearTimeout(timer);\n\
         \x20 document.removeEventListener(\"visibilitychange\", onVisibility);\n\
         }}\n\
         function onVisibility() {{\n\
         \x20 if (document.hidden) {{ stop(); }}\n\
         }}\n\
         document.addEventListener(\"visibilitychange\", onVisibility);\n\
         window.addEventListener(\"pagehide\", stop);\n\
         window.location.href = appUri;\n\
         }})();\n</script>",
        key = script_string(HANDOFF_STORAGE_KEY),
        app = script_string(&plan.app_uri),
        web = script_string(&plan.web_fallback_uri),
        delay = plan.delay_ms,
        threshold = plan.threshold_ms,
    )
}

fn post_button(action: &str, label: &str) -> String {
    format!(
        "<form method=\"post\" action=\"{action}\">\
         <button type=\"submit\">{label}</button></form>"
    )
}

fn with_handoff(mut body: String, plan: Option<&HandoffPlan>) -> String {
    if let Some(plan) = plan {
        body.push('\n');
        let _ = write!(
            body,
            "<p class=\"open-in-app\"><a href=\"{}\">Open in the HillsGo app</a></p>\n{}",
            escape(&plan.app_uri),
            handoff_script(plan)
        );
    }

    body
}

pub fn product_page(product: &Product, plan: Option<&HandoffPlan>) -> Html<String> {
    let mut body = format!("<h1>{}</h1>\n", escape(&product.name));
    if let Some(image) = &product.image_url {
        let _ = writeln!(body, "<img src=\"{}\" alt=\"{}\">", escape(image), escape(&product.name));
    }
    let _ = write!(
        body,
        "<p class=\"price\">{:.2}</p>\n<p>{}</p>",
        product.price,
        escape(&product.description)
    );

    page(&product.name, &with_handoff(body, plan))
}

pub fn worker_page(worker: &Worker, plan: Option<&HandoffPlan>) -> Html<String> {
    let mut body = format!(
        "<h1>{}</h1>\n<p class=\"category\">{}</p>\n",
        escape(&worker.name),
        escape(&worker.category)
    );
    if let Some(photo) = &worker.photo_url {
        let _ = writeln!(body, "<img src=\"{}\" alt=\"{}\">", escape(photo), escape(&worker.name));
    }
    let _ = write!(
        body,
        "<p>{}</p>\n<p><a href=\"tel:{}\">Call {}</a></p>",
        escape(&worker.description),
        escape(&worker.phone),
        escape(&worker.name)
    );

    page(&worker.name, &with_handoff(body, plan))
}

pub fn login(message: Option<&str>) -> Html<String> {
    let body = format!(
        "<h1>Sign in</h1>\n{}\
         <form method=\"post\" action=\"/login\">\n\
         <label>Email <input type=\"email\" name=\"email\" required></label>\n\
         <label>Password <input type=\"password\" name=\"password\" required></label>\n\
         <button type=\"submit\">Sign in</button>\n</form>",
        message_block(message)
    );

    page("Sign in", &body)
}

pub fn estore_dashboard(products: &[Document<Product>], message: Option<&str>) -> Html<String> {
    let mut body = String::from("<h1>Your store</h1>\n");
    body.push_str(sign_out_form());
    body.push_str(&message_block(message));

    body.push_str(
        "<h2>New product</h2>\n\
         <form method=\"post\" action=\"/estore/products\" enctype=\"multipart/form-data\">\n\
         <label>Name <input name=\"name\" required></label>\n\
         <label>Price <input name=\"price\" inputmode=\"decimal\" required></label>\n\
         <label>Description <textarea name=\"description\"></textarea></label>\n\
         <label>Image <input type=\"file\" name=\"image\" accept=\"image/*\"></label>\n\
         <button type=\"submit\">Add product</button>\n</form>\n",
    );

    body.push_str("<h2>Products</h2>\n<table>\n");
    for product in products {
        let _ = writeln!(
            body,
            "<tr><td><a href=\"/products/{id}\">{name}</a></td><td>{price:.2}</td>\
             <td>{created}</td><td>{delete}</td></tr>",
            delete = post_button(
                &format!("/estore/products/{}/delete", escape(&product.id)),
                "Delete"
            ),
            id = escape(&product.id),
            name = escape(&product.data.name),
            price = product.data.price,
            created = date(product.data.created_at),
        );
    }
    body.push_str("</table>");

    page("Store dashboard", &body)
}

pub fn worker_dashboard(worker: Option<&Document<Worker>>, message: Option<&str>) -> Html<String> {
    let mut body = String::from("<h1>Your profile</h1>\n");
    body.push_str(sign_out_form());
    body.push_str(&message_block(message));

    match worker {
        Some(worker) => {
            let _ = write!(
                body,
                "<p><a href=\"/workers/{id}\">{name}</a>, {category}</p>\n\
                 <form method=\"post\" action=\"/skilled-worker/profile\">\n\
                 <label>Phone <input name=\"phone\" value=\"{phone}\"></label>\n\
                 <label>About <textarea name=\"description\">{description}</textarea></label>\n\
                 <button type=\"submit\">Save</button>\n</form>",
                id = escape(&worker.id),
                name = escape(&worker.data.name),
                category = escape(&worker.data.category),
                phone = escape(&worker.data.phone),
                description = escape(&worker.data.description),
            );
        }
        None => body.push_str("<p>No worker profile is linked to this account yet.</p>"),
    }

    page("Worker dashboard", &body)
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "Pending",
        OrderStatus::InTransit => "In transit",
        OrderStatus::Delivered => "Delivered",
    }
}

pub fn driver_dashboard(orders: &[Document<Order>], message: Option<&str>) -> Html<String> {
    let mut body = String::from("<h1>Your deliveries</h1>\n");
    body.push_str(sign_out_form());
    body.push_str(&message_block(message));

    body.push_str("<table>\n");
    for order in orders {
        let _ = write!(
            body,
            "<tr><td><a href=\"/products/{product}\">{product}</a></td>\
             <td>{address}</td><td>{status}</td><td>",
            product = escape(&order.data.product_id),
            address = escape(&order.data.address),
            status = status_label(order.data.status),
        );
        if order.data.status != OrderStatus::Delivered {
            let action = format!("/driver/orders/{}/delivered", escape(&order.id));
            body.push_str(&post_button(&action, "Mark delivered"));
        }
        body.push_str("</td></tr>\n");
    }
    body.push_str("</table>");

    page("Driver dashboard", &body)
}

pub fn admin_dashboard(
    workers: &[Document<Worker>],
    categories: &[Document<Category>],
    users: &[Document<UserRecord>],
    message: Option<&str>,
) -> Html<String> {
    let mut body = String::from("<h1>Admin</h1>\n");
    body.push_str(sign_out_form());
    body.push_str(&message_block(message));

    body.push_str(
        "<h2>New worker</h2>\n\
         <form method=\"post\" action=\"/admin/workers\" enctype=\"multipart/form-data\">\n\
         <label>Name <input name=\"name\" required></label>\n\
         <label>Email <input type=\"email\" name=\"email\" required></label>\n\
         <label>Phone <input name=\"phone\"></label>\n\
         <label>Category <input name=\"category\" list=\"categories\" required></label>\n\
         <label>About <textarea name=\"description\"></textarea></label>\n\
         <label>Photo <input type=\"file\" name=\"photo\" accept=\"image/*\"></label>\n\
         <button type=\"submit\">Create worker</button>\n</form>\n<datalist id=\"categories\">\n",
    );
    for category in categories {
        let _ = writeln!(body, "<option value=\"{}\">", escape(&category.data.name));
    }
    body.push_str("</datalist>\n");

    let _ = writeln!(body, "<h2>Workers ({})</h2>\n<table>", workers.len());
    for worker in workers {
        let _ = writeln!(
            body,
            "<tr><td><a href=\"/workers/{id}\">{name}</a></td><td>{email}</td>\
             <td>{category}</td><td>{delete}</td></tr>",
            delete = post_button(
                &format!("/admin/workers/{}/delete", escape(&worker.id)),
                "Delete"
            ),
            id = escape(&worker.id),
            name = escape(&worker.data.name),
            email = escape(&worker.data.email),
            category = escape(&worker.data.category),
        );
    }
    body.push_str("</table>\n");

    let _ = writeln!(body, "<h2>Users ({})</h2>\n<table>", users.len());
    for user in users {
        let _ = writeln!(
            body,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&user.data.email),
            escape(&user.data.name),
            escape(user.data.role.as_str()),
            date(user.data.created_at),
        );
    }
    body.push_str("</table>");

    page("Admin dashboard", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deeplink::{DeepLinkAttempt, HandoffTiming, TargetKind};

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_script_string_cannot_close_script() {
        assert_eq!(script_string("a</script>"), "\"a<\\/script>\"");
    }

    #[test]
    fn test_product_page_with_plan() {
        let product = Product {
            name: "Mango <jam>".to_string(),
            description: String::new(),
            price: 2.5,
            image_url: None,
            store_id: "s1".to_string(),
            created_at: None,
        };
        let attempt =
            DeepLinkAttempt::new(TargetKind::Product, "p1", "hillsgo", "https://hillsgo.rw");
        let plan = HandoffPlan::new(&attempt, HandoffTiming::default());

        let Html(html) = product_page(&product, Some(&plan));
        assert!(html.contains("Mango &lt;jam&gt;"));
        assert!(html.contains("\"hillsgo://product/p1\""));
        assert!(html.contains("}, 1500);"));
        assert!(html.contains("< 1600"));
        assert!(html.contains("sessionStorage.getItem(key)"));
        assert!(html.contains("var key = \"hillsgo:handoff\";"));
        assert_eq!(html.matches("<script>").count(), 1);

        let Html(plain) = product_page(&product, None);
        assert!(!plain.contains("hillsgo://"));
    }
}
